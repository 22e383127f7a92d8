//! Pixmap handles
//!
//! A pixmap is the backend-agnostic view of the pixels shown for a surface. The
//! rendering side only ever looks at pixmaps: it calls [`PixmapRegistry::refresh`]
//! to pick up the dimensions of the currently bound buffer, then reads them back
//! through [`Pixmap::size`].
//!
//! Pixmaps are reference counted and registered under a `(type, id)` key, plus an
//! optional parent alias key, for as long as they hold at least one reference.

use std::collections::HashMap;

use tracing::{debug, error, trace};

use crate::{
    buffer::{format, BufferId, BufferRegistry},
    compositor::SurfaceId,
    utils::{
        arena::{arena_key, Arena},
        Buffer as BufferCoords, Size,
    },
};

arena_key!(
    /// Handle to a pixmap of a [`PixmapRegistry`]
    PixmapId
);

/// Backend variant of a pixmap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixmapType {
    /// Backed by a client buffer
    Wayland,
    /// Backed by compositor-owned storage, sized explicitly
    Offscreen,
}

/// Errors of the pixmap registry
#[derive(Debug, thiserror::Error)]
pub enum PixmapError {
    /// The pixmap could not be allocated
    #[error("not enough memory to allocate the pixmap")]
    NoMemory,
    /// The handle does not refer to a live pixmap
    #[error("the pixmap was released")]
    Dead,
    /// The id is already registered for another pixmap
    #[error("pixmap id {0} is taken by another pixmap")]
    IdInUse(u64),
}

/// Derive the pixmap id of a surface from its client pid and protocol id
pub fn surface_pixmap_id(pid: u32, protocol_id: u32) -> u64 {
    ((pid as u64) << 32) | protocol_id as u64
}

/// State of one pixmap
#[derive(Debug)]
pub struct Pixmap {
    kind: PixmapType,
    id: u64,
    parent: Option<u64>,
    refcount: u32,
    size: Size<i32, BufferCoords>,
    has_alpha: bool,
    dirty: bool,
    usable: bool,
    failures: u32,
    buffer: Option<BufferId>,
    offscreen: Option<(Size<i32, BufferCoords>, bool)>,
    surface: Option<SurfaceId>,
}

impl Pixmap {
    /// Backend variant
    pub fn kind(&self) -> PixmapType {
        self.kind
    }

    /// Primary id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Parent alias id, if any
    pub fn parent(&self) -> Option<u64> {
        self.parent
    }

    /// Number of holders of this pixmap
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Dimensions from the last successful refresh, and whether both are non-zero
    pub fn size(&self) -> (Size<i32, BufferCoords>, bool) {
        (self.size, self.size.w > 0 && self.size.h > 0)
    }

    /// Whether the pixel format carries an alpha channel
    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    /// Whether the pixmap needs a refresh before its dimensions can be trusted
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the pixmap has backing storage that can be refreshed
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Number of failed refreshes since the last successful one
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Client buffer bound to a [`PixmapType::Wayland`] pixmap
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Surface this pixmap backs
    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    /// Whether the given dimensions differ from the known ones
    ///
    /// A dirty pixmap always reports a change.
    pub fn size_changed(&self, w: i32, h: i32) -> bool {
        self.dirty || self.size.w != w || self.size.h != h
    }

    fn clear(&mut self) {
        self.size = Size::default();
        self.has_alpha = false;
        self.dirty = true;
    }
}

/// Registry of all live pixmaps
#[derive(Debug, Default)]
pub struct PixmapRegistry {
    pixmaps: Arena<PixmapId, Pixmap>,
    by_key: HashMap<(PixmapType, u64), PixmapId>,
}

impl PixmapRegistry {
    /// Create an empty registry
    pub fn new() -> PixmapRegistry {
        PixmapRegistry::default()
    }

    /// Number of live pixmaps
    pub fn len(&self) -> usize {
        self.pixmaps.len()
    }

    /// Whether no pixmap is alive
    pub fn is_empty(&self) -> bool {
        self.pixmaps.is_empty()
    }

    /// Look up a pixmap by primary id or parent alias
    pub fn find(&self, kind: PixmapType, id: u64) -> Option<PixmapId> {
        self.by_key.get(&(kind, id)).copied()
    }

    /// Access a pixmap
    pub fn get(&self, handle: PixmapId) -> Option<&Pixmap> {
        self.pixmaps.get(handle)
    }

    /// Take a reference to the pixmap with the given id, creating it if needed
    ///
    /// New pixmaps start with one reference, dirty and not usable.
    pub fn acquire(&mut self, kind: PixmapType, id: u64) -> Result<PixmapId, PixmapError> {
        if let Some(handle) = self.find(kind, id) {
            if let Some(pixmap) = self.pixmaps.get_mut(handle) {
                pixmap.refcount += 1;
                return Ok(handle);
            }
        }

        self.by_key.try_reserve(1).map_err(|_| PixmapError::NoMemory)?;
        let handle = self
            .pixmaps
            .try_insert(Pixmap {
                kind,
                id,
                parent: None,
                refcount: 1,
                size: Size::default(),
                has_alpha: false,
                dirty: true,
                usable: false,
                failures: 0,
                buffer: None,
                offscreen: None,
                surface: None,
            })
            .map_err(|_| PixmapError::NoMemory)?;
        self.by_key.insert((kind, id), handle);
        debug!(?kind, id, ?handle, "new pixmap");
        Ok(handle)
    }

    /// Drop a reference to a pixmap
    ///
    /// Returns true if this was the last reference, in which case the pixmap is
    /// unregistered under its id and alias and freed.
    pub fn release(&mut self, handle: PixmapId) -> bool {
        let Some(pixmap) = self.pixmaps.get_mut(handle) else {
            error!(?handle, "releasing a dead pixmap");
            return false;
        };
        pixmap.refcount = pixmap.refcount.saturating_sub(1);
        if pixmap.refcount > 0 {
            return false;
        }

        pixmap.clear();
        let (kind, id, parent) = (pixmap.kind, pixmap.id, pixmap.parent);
        self.unregister((kind, id), handle);
        if let Some(parent) = parent {
            self.unregister((kind, parent), handle);
        }
        self.pixmaps.remove(handle);
        debug!(?kind, id, "pixmap freed");
        true
    }

    /// Register the pixmap under a parent alias, or drop its alias
    ///
    /// The backing storage is dropped first, so nothing stale is ever visible under the
    /// new alias. An alias already registered for another pixmap is refused.
    pub fn set_parent_alias(&mut self, handle: PixmapId, alias: Option<u64>) -> Result<(), PixmapError> {
        let kind = self.pixmaps.get(handle).ok_or(PixmapError::Dead)?.kind;
        if let Some(alias) = alias {
            match self.by_key.get(&(kind, alias)) {
                Some(owner) if *owner != handle => return Err(PixmapError::IdInUse(alias)),
                _ => {}
            }
        }
        self.by_key.try_reserve(1).map_err(|_| PixmapError::NoMemory)?;
        let pixmap = self.pixmaps.get_mut(handle).ok_or(PixmapError::Dead)?;
        if pixmap.parent == alias {
            return Ok(());
        }

        pixmap.usable = false;
        pixmap.buffer = None;
        pixmap.offscreen = None;
        pixmap.clear();

        if let Some(old) = pixmap.parent.take() {
            self.unregister((kind, old), handle);
        }
        if let Some(alias) = alias {
            self.by_key.insert((kind, alias), handle);
        }
        if let Some(pixmap) = self.pixmaps.get_mut(handle) {
            pixmap.parent = alias;
        }
        Ok(())
    }

    // Only drop a key still registered for this pixmap
    fn unregister(&mut self, key: (PixmapType, u64), handle: PixmapId) {
        if self.by_key.get(&key) == Some(&handle) {
            self.by_key.remove(&key);
        }
    }

    /// Bind the client buffer providing the pixels of a pixmap
    ///
    /// The pixmap becomes usable exactly when a buffer is bound, and dirty.
    pub fn bind(&mut self, handle: PixmapId, buffer: Option<BufferId>) -> Result<(), PixmapError> {
        let pixmap = self.pixmaps.get_mut(handle).ok_or(PixmapError::Dead)?;
        pixmap.buffer = buffer;
        pixmap.usable = buffer.is_some();
        pixmap.dirty = true;
        Ok(())
    }

    /// Give an [`PixmapType::Offscreen`] pixmap storage of the given size
    pub fn set_offscreen_size(
        &mut self,
        handle: PixmapId,
        size: Size<i32, BufferCoords>,
        has_alpha: bool,
    ) -> Result<(), PixmapError> {
        let pixmap = self.pixmaps.get_mut(handle).ok_or(PixmapError::Dead)?;
        pixmap.usable = true;
        pixmap.dirty = true;
        pixmap.offscreen = Some((size, has_alpha));
        Ok(())
    }

    /// Record the surface a pixmap backs
    pub fn set_surface(&mut self, handle: PixmapId, surface: Option<SurfaceId>) -> Result<(), PixmapError> {
        let pixmap = self.pixmaps.get_mut(handle).ok_or(PixmapError::Dead)?;
        pixmap.surface = surface;
        Ok(())
    }

    /// Mark a pixmap as needing a refresh
    pub fn mark_dirty(&mut self, handle: PixmapId) {
        if let Some(pixmap) = self.pixmaps.get_mut(handle) {
            pixmap.dirty = true;
        }
    }

    /// Reset the known dimensions and alpha of a pixmap
    pub fn clear(&mut self, handle: PixmapId) {
        if let Some(pixmap) = self.pixmaps.get_mut(handle) {
            pixmap.clear();
        }
    }

    /// Whether the given dimensions differ from the known ones, see [`Pixmap::size_changed`]
    pub fn size_changed(&self, handle: PixmapId, w: i32, h: i32) -> bool {
        self.pixmaps
            .get(handle)
            .map(|pixmap| pixmap.size_changed(w, h))
            .unwrap_or(true)
    }

    /// Re-read dimensions and alpha from the backing storage
    ///
    /// Returns false without touching the dimensions if the pixmap is not usable, or if
    /// the backing storage reports empty dimensions; both count as a failure. A clean
    /// pixmap is not re-read.
    #[profiling::function]
    pub fn refresh(&mut self, handle: PixmapId, buffers: &BufferRegistry) -> bool {
        let Some(pixmap) = self.pixmaps.get_mut(handle) else {
            error!(?handle, "refresh of a released pixmap");
            return false;
        };

        if !pixmap.usable {
            pixmap.failures += 1;
            trace!(?handle, failures = pixmap.failures, "refresh of unusable pixmap");
            return false;
        }
        if !pixmap.dirty {
            return true;
        }

        let read = match pixmap.kind {
            PixmapType::Wayland => pixmap.buffer.and_then(|buffer| buffers.get(buffer)).map(|entry| {
                let attributes = entry.attributes();
                let alpha = attributes.fourcc().map(format::has_alpha).unwrap_or(false);
                (attributes.size(), alpha)
            }),
            PixmapType::Offscreen => pixmap.offscreen,
        };

        match read {
            Some((size, alpha)) if size.w > 0 && size.h > 0 => {
                pixmap.size = size;
                pixmap.has_alpha = alpha;
                pixmap.dirty = false;
                pixmap.failures = 0;
                true
            }
            _ => {
                pixmap.failures += 1;
                trace!(?handle, failures = pixmap.failures, "pixmap refresh failed");
                false
            }
        }
    }
}
