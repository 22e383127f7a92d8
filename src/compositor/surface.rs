//! Per-surface state
//!
//! Every surface has two snapshots: [`PendingState`], mutated by client requests, and
//! [`SurfaceAttributes`], mutated only when the surface is committed.

use smallvec::SmallVec;

use crate::{
    buffer::{BufferId, BufferSlot, SlotKind},
    pixmap::PixmapId,
    protocol::ObjectId,
    region::Region,
    shell::ShellSurface,
    utils::{Buffer as BufferCoords, Logical, Point, Rectangle, Size, Transform},
};

use super::{SurfaceChanges, SurfaceId};

/// State staged by client requests, applied on commit
#[derive(Debug)]
pub struct PendingState {
    /// Whether `attach` was called since the last commit
    pub new_attach: bool,
    /// Offset given to the last `attach`
    pub offset: Point<i32, Logical>,
    /// Size of the buffer given to the last `attach`
    pub buffer_size: Size<i32, BufferCoords>,
    pub(crate) slot: BufferSlot,
    /// Accumulated damage, in surface coordinates
    pub damage: Region,
    /// Opaque region, `None` until the client sets one or after it set a null region
    pub opaque: Option<Region>,
    /// Input region, `None` until the client sets one or after it set a null region
    pub input: Option<Region>,
    /// Buffer scale to apply on the next commit
    pub buffer_scale: Option<i32>,
    /// Buffer transform to apply on the next commit
    pub buffer_transform: Option<Transform>,
}

impl PendingState {
    fn new(surface: SurfaceId) -> PendingState {
        PendingState {
            new_attach: false,
            offset: Point::default(),
            buffer_size: Size::default(),
            slot: BufferSlot::new(surface, SlotKind::Pending),
            damage: Region::default(),
            opaque: None,
            input: None,
            buffer_scale: None,
            buffer_transform: None,
        }
    }

    /// Buffer staged by the last `attach`
    pub fn buffer(&self) -> Option<BufferId> {
        self.slot.buffer()
    }
}

/// Committed state of a surface
#[derive(Debug)]
pub struct SurfaceAttributes {
    pub(crate) slot: BufferSlot,
    /// Offset of the last attached buffer
    pub offset: Point<i32, Logical>,
    /// Size of the committed buffer, in buffer coordinates
    pub buffer_size: Size<i32, BufferCoords>,
    /// Size of the surface, from the buffer size, scale and transform
    pub size: Size<i32, Logical>,
    /// Scale of the contents of the buffer
    pub buffer_scale: i32,
    /// Transform under which to interpret the contents of the buffer
    pub buffer_transform: Transform,
    /// Hit-test rectangles
    pub input_rects: Vec<Rectangle<i32, Logical>>,
    /// Rectangles guaranteed to be opaque
    pub opaque_rects: Vec<Rectangle<i32, Logical>>,
}

impl SurfaceAttributes {
    fn new(surface: SurfaceId) -> SurfaceAttributes {
        SurfaceAttributes {
            slot: BufferSlot::new(surface, SlotKind::Current),
            offset: Point::default(),
            buffer_size: Size::default(),
            size: Size::default(),
            buffer_scale: 1,
            buffer_transform: Transform::Normal,
            input_rects: Vec::new(),
            opaque_rects: Vec::new(),
        }
    }

    /// Buffer currently shown, until the next render completes
    pub fn buffer(&self) -> Option<BufferId> {
        self.slot.buffer()
    }

    /// The surface rectangle, in surface coordinates
    pub fn rect(&self) -> Rectangle<i32, Logical> {
        Rectangle::from_size(self.size)
    }
}

/// A queued frame callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCallback {
    /// Protocol object of the callback
    pub resource: ObjectId,
}

/// All the state tracked for a surface
#[derive(Debug)]
pub struct SurfaceData {
    pub(crate) resource: ObjectId,
    pub(crate) pixmap: PixmapId,
    pub(crate) pending: PendingState,
    pub(crate) current: SurfaceAttributes,
    pub(crate) frame_callbacks: SmallVec<[FrameCallback; 2]>,
    pub(crate) shell: Option<Box<dyn ShellSurface>>,
    pub(crate) mapped: bool,
    pub(crate) changes: SurfaceChanges,
}

impl SurfaceData {
    pub(crate) fn new(surface: SurfaceId, resource: ObjectId, pixmap: PixmapId) -> SurfaceData {
        SurfaceData {
            resource,
            pixmap,
            pending: PendingState::new(surface),
            current: SurfaceAttributes::new(surface),
            frame_callbacks: SmallVec::new(),
            shell: None,
            mapped: false,
            changes: SurfaceChanges::empty(),
        }
    }

    /// Protocol object of the surface
    pub fn resource(&self) -> ObjectId {
        self.resource
    }

    /// Pixmap backing this surface
    pub fn pixmap(&self) -> PixmapId {
        self.pixmap
    }

    /// State staged for the next commit
    pub fn pending(&self) -> &PendingState {
        &self.pending
    }

    /// Committed state
    pub fn current(&self) -> &SurfaceAttributes {
        &self.current
    }

    /// Frame callbacks waiting for the next render completion
    pub fn frame_callbacks(&self) -> &[FrameCallback] {
        &self.frame_callbacks
    }

    /// Whether the surface has a committed buffer
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Whether a shell is bound to the surface
    pub fn has_shell(&self) -> bool {
        self.shell.is_some()
    }

    /// Changes accumulated by commits since they were last taken
    pub fn changes(&self) -> SurfaceChanges {
        self.changes
    }

    pub(crate) fn slot_mut(&mut self, kind: SlotKind) -> &mut BufferSlot {
        match kind {
            SlotKind::Pending => &mut self.pending.slot,
            SlotKind::Current => &mut self.current.slot,
        }
    }
}
