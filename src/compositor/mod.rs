//! Surface state machine
//!
//! [`CompositorState`] owns every surface and region created by clients, together with
//! the [`BufferRegistry`] and [`PixmapRegistry`] they reference. Client requests mutate
//! the pending state of a surface; [`CompositorState::commit`] applies it in one step:
//!
//! 1. a newly attached buffer becomes the current one and is bound to the surface pixmap,
//! 2. a bound shell is reconfigured if the buffer size changed,
//! 3. the surface is mapped or unmapped if it gained or lost its buffer,
//! 4. the pending attach is cleared,
//! 5. pending damage, clipped to the surface, is shaped and handed to the renderer,
//! 6. the input and opaque regions are clipped and flattened to rectangle lists.
//!
//! Steps 1 to 4 only run if the client attached something since the last commit.
//!
//! The rendering side drives the other half of the lifecycle: it calls
//! [`CompositorState::render_complete`] after each render pass, which fires the queued
//! frame callbacks and releases the buffers it has consumed.
//!
//! Events for clients (buffer release, callback done, ...) are queued and retrieved
//! with [`CompositorState::take_events`].

use tracing::{debug, error, instrument, trace, warn};

use crate::{
    buffer::{BufferAttributes, BufferError, BufferId, BufferRegistry, SlotKind},
    config::{CompositorConfig, NullRegion},
    pixmap::{surface_pixmap_id, PixmapError, PixmapId, PixmapRegistry, PixmapType},
    protocol::{Event, EventQueue, ObjectId},
    region::Region,
    shell::ShellSurface,
    utils::{
        arena::{arena_key, Arena},
        Clock, Logical, Monotonic, Rectangle, Transform,
    },
};

mod damage;
mod surface;

pub use self::damage::DamageShaper;
pub use self::surface::{FrameCallback, PendingState, SurfaceAttributes, SurfaceData};

arena_key!(
    /// Handle to a surface of a [`CompositorState`]
    SurfaceId
);

arena_key!(
    /// Handle to a region of a [`CompositorState`]
    RegionId
);

bitflags::bitflags! {
    /// What a commit changed on a surface
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceChanges: u32 {
        /// The input rectangles were replaced
        const INPUT_SHAPE = 1;
        /// The opaque rectangles were replaced
        const OPAQUE = 1 << 1;
        /// The surface size changed
        const SIZE = 1 << 2;
        /// A new buffer (or none) was committed
        const BUFFER = 1 << 3;
        /// The surface was mapped or unmapped
        const MAPPED = 1 << 4;
    }
}

/// Errors of surface and region operations
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    /// The surface was destroyed
    #[error("the surface was destroyed")]
    DeadSurface,
    /// The region was destroyed
    #[error("the region was destroyed")]
    DeadRegion,
    /// The buffer was destroyed or is unknown
    #[error("the buffer was destroyed")]
    DeadBuffer,
    /// The buffer scale is not a positive integer
    #[error("invalid buffer scale {0}")]
    InvalidScale(i32),
    /// An allocation failed or a limit was reached
    #[error("not enough memory")]
    NoMemory,
    /// The pixmap id of a new surface is registered for another pixmap
    #[error("pixmap id {0} is taken")]
    PixmapIdInUse(u64),
}

impl From<BufferError> for CompositorError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::NoMemory => CompositorError::NoMemory,
            BufferError::Unknown => CompositorError::DeadBuffer,
        }
    }
}

impl From<PixmapError> for CompositorError {
    fn from(err: PixmapError) -> Self {
        match err {
            PixmapError::NoMemory => CompositorError::NoMemory,
            PixmapError::Dead => CompositorError::DeadSurface,
            PixmapError::IdInUse(id) => CompositorError::PixmapIdInUse(id),
        }
    }
}

/// Handler for the rendering side of the compositor
pub trait CompositorHandler {
    /// Part of a surface changed and must be redrawn
    ///
    /// `rect` is in surface coordinates and inside of the surface.
    fn damage(&mut self, surface: SurfaceId, rect: Rectangle<i32, Logical>);

    /// A new buffer (or none) was bound to the pixmap of a surface
    ///
    /// The pixmap was refreshed already.
    fn buffer_bound(&mut self, surface: SurfaceId, pixmap: PixmapId) {
        let _ = (surface, pixmap);
    }

    /// Whether the surface is currently rendered somewhere
    ///
    /// Damage of surfaces without a render target keeps accumulating until it has one.
    fn has_render_target(&self, surface: SurfaceId) -> bool {
        let _ = surface;
        true
    }

    /// A surface was committed
    fn commit(&mut self, surface: SurfaceId) {
        let _ = surface;
    }
}

#[derive(Debug)]
struct RegionData {
    resource: ObjectId,
    region: Region,
}

/// State of the surfaces, regions, buffers and pixmaps of all clients
#[derive(Debug)]
pub struct CompositorState {
    config: CompositorConfig,
    surfaces: Arena<SurfaceId, SurfaceData>,
    regions: Arena<RegionId, RegionData>,
    buffers: BufferRegistry,
    pixmaps: PixmapRegistry,
    events: EventQueue,
    shaper: DamageShaper,
}

impl CompositorState {
    /// Create a new compositor state
    pub fn new(config: CompositorConfig) -> CompositorState {
        CompositorState {
            config,
            surfaces: Arena::new(),
            regions: Arena::new(),
            buffers: BufferRegistry::new(),
            pixmaps: PixmapRegistry::new(),
            events: EventQueue::new(),
            shaper: DamageShaper::default(),
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Access the buffer registry
    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    /// Access the pixmap registry
    pub fn pixmaps(&self) -> &PixmapRegistry {
        &self.pixmaps
    }

    /// Refresh the pixmap of a surface, see [`PixmapRegistry::refresh`]
    pub fn refresh_pixmap(&mut self, pixmap: PixmapId) -> bool {
        self.pixmaps.refresh(pixmap, &self.buffers)
    }

    /// Access the state of a surface
    pub fn surface(&self, surface: SurfaceId) -> Option<&SurfaceData> {
        self.surfaces.get(surface)
    }

    /// Number of live surfaces
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Access the content of a region
    pub fn region(&self, region: RegionId) -> Option<&Region> {
        self.regions.get(region).map(|data| &data.region)
    }

    /// Find the surface backed by the pixmap with the given id
    pub fn surface_for_pixmap(&self, pixmap_id: u64) -> Option<SurfaceId> {
        let handle = self.pixmaps.find(PixmapType::Wayland, pixmap_id)?;
        self.pixmaps.get(handle)?.surface()
    }

    /// Retrieve the events queued for clients since the last call
    pub fn take_events(&mut self) -> EventQueue {
        std::mem::take(&mut self.events)
    }

    /*
     * Creation and destruction
     */

    /// Create the state of a new surface
    ///
    /// The surface is backed by the pixmap derived from the client pid and the
    /// protocol id of the surface, which is created if it does not exist yet.
    pub fn create_surface(&mut self, resource: ObjectId, pid: u32) -> Result<SurfaceId, CompositorError> {
        let pixmap_id = surface_pixmap_id(pid, resource.protocol_id);
        let pixmap = self.pixmaps.acquire(PixmapType::Wayland, pixmap_id)?;

        let surface = match self
            .surfaces
            .try_insert_with(|surface| SurfaceData::new(surface, resource, pixmap))
        {
            Ok(surface) => surface,
            Err(_) => {
                self.pixmaps.release(pixmap);
                return Err(CompositorError::NoMemory);
            }
        };
        self.pixmaps.set_surface(pixmap, Some(surface))?;

        trace!(?resource, ?surface, pixmap_id, "new surface");
        Ok(surface)
    }

    /// Destroy a surface
    ///
    /// Queued frame callbacks are dropped without firing, buffers are released and the
    /// pixmap reference of the surface is dropped.
    #[instrument(level = "trace", skip(self))]
    pub fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;

        for callback in data.frame_callbacks.drain(..) {
            self.events.push((
                callback.resource.client,
                Event::DeleteId {
                    id: callback.resource.protocol_id,
                },
            ));
        }
        for kind in [SlotKind::Pending, SlotKind::Current] {
            if let Err(err) = self.buffers.reference(data.slot_mut(kind), None, &mut self.events) {
                error!(?surface, ?err, "failed to release buffer of destroyed surface");
            }
        }

        let pixmap = data.pixmap;
        if self.pixmaps.get(pixmap).and_then(|p| p.surface()) == Some(surface) {
            if let Err(err) = self
                .pixmaps
                .set_surface(pixmap, None)
                .and_then(|_| self.pixmaps.bind(pixmap, None))
            {
                error!(?surface, ?err, "failed to unbind pixmap of destroyed surface");
            }
        }
        self.pixmaps.release(pixmap);
        self.surfaces.remove(surface);
        Ok(())
    }

    /// Create a region covering the whole output
    pub fn create_region(&mut self, resource: ObjectId) -> Result<RegionId, CompositorError> {
        let region = Region::full(self.config.output_size.into());
        let id = self
            .regions
            .try_insert(RegionData { resource, region })
            .map_err(|_| CompositorError::NoMemory)?;
        trace!(?resource, region = ?id, "new region");
        Ok(id)
    }

    /// Add a rectangle to a region
    pub fn region_add(&mut self, region: RegionId, rect: Rectangle<i32, Logical>) -> Result<(), CompositorError> {
        let data = self.regions.get_mut(region).ok_or(CompositorError::DeadRegion)?;
        data.region
            .try_union_rect(rect)
            .map_err(|_| CompositorError::NoMemory)
    }

    /// Remove a rectangle from a region
    pub fn region_subtract(
        &mut self,
        region: RegionId,
        rect: Rectangle<i32, Logical>,
    ) -> Result<(), CompositorError> {
        let data = self.regions.get_mut(region).ok_or(CompositorError::DeadRegion)?;
        data.region.subtract_rect(rect);
        Ok(())
    }

    /// Destroy a region
    ///
    /// Surfaces keep what was merged from it into their pending state.
    pub fn destroy_region(&mut self, region: RegionId) -> Result<(), CompositorError> {
        let data = self.regions.remove(region).ok_or(CompositorError::DeadRegion)?;
        trace!(resource = ?data.resource, "region destroyed");
        Ok(())
    }

    /// Start tracking a buffer created by a client
    pub fn create_buffer(
        &mut self,
        resource: ObjectId,
        attributes: BufferAttributes,
    ) -> Result<BufferId, CompositorError> {
        Ok(self.buffers.get_or_create(resource, attributes)?)
    }

    /// The client destroyed a buffer
    ///
    /// Every slot still referencing it forgets it. A pending attach of this buffer
    /// stays pending, and will commit as a null attach.
    pub fn destroy_buffer(&mut self, resource: ObjectId) {
        for key in self.buffers.destroy(resource) {
            match self.surfaces.get_mut(key.surface) {
                Some(data) => data.slot_mut(key.kind).forget(),
                None => error!(?key, "destroyed buffer was observed by a dead surface"),
            }
        }
    }

    /*
     * Surface requests
     */

    /// Stage a buffer (or none) for the next commit
    ///
    /// Replaces any buffer staged before. The staged buffer is referenced until the
    /// commit, and released if another one replaces it first.
    pub fn attach(
        &mut self,
        surface: SurfaceId,
        buffer: Option<BufferId>,
        dx: i32,
        dy: i32,
    ) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        let buffer_size = match buffer {
            Some(buffer) => self
                .buffers
                .get(buffer)
                .ok_or(CompositorError::DeadBuffer)?
                .attributes()
                .size(),
            None => Default::default(),
        };

        self.buffers
            .reference(&mut data.pending.slot, buffer, &mut self.events)?;
        data.pending.offset = (dx, dy).into();
        data.pending.buffer_size = buffer_size;
        data.pending.new_attach = true;
        trace!(?surface, ?buffer, dx, dy, "attach");
        Ok(())
    }

    /// Add a rectangle to the pending damage
    ///
    /// The rectangle is clipped to the surface on commit.
    pub fn damage(&mut self, surface: SurfaceId, rect: Rectangle<i32, Logical>) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        data.pending
            .damage
            .try_union_rect(rect)
            .map_err(|_| CompositorError::NoMemory)
    }

    /// Merge a region into the pending opaque region, or reset it
    pub fn set_opaque_region(
        &mut self,
        surface: SurfaceId,
        region: Option<RegionId>,
    ) -> Result<(), CompositorError> {
        self.merge_region(surface, region, |pending| &mut pending.opaque)
    }

    /// Merge a region into the pending input region, or reset it
    pub fn set_input_region(
        &mut self,
        surface: SurfaceId,
        region: Option<RegionId>,
    ) -> Result<(), CompositorError> {
        self.merge_region(surface, region, |pending| &mut pending.input)
    }

    fn merge_region(
        &mut self,
        surface: SurfaceId,
        region: Option<RegionId>,
        field: impl FnOnce(&mut PendingState) -> &mut Option<Region>,
    ) -> Result<(), CompositorError> {
        let source = match region {
            Some(region) => Some(&self.regions.get(region).ok_or(CompositorError::DeadRegion)?.region),
            None => None,
        };
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        let target = field(&mut data.pending);

        match source {
            Some(source) => {
                let mut merged = target.take().unwrap_or_default();
                merged.union(source);
                *target = Some(merged);
            }
            None => *target = None,
        }
        Ok(())
    }

    /// Queue a frame callback, fired at the next render completion
    pub fn frame(&mut self, surface: SurfaceId, callback: ObjectId) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        if data.frame_callbacks.len() >= self.config.max_frame_callbacks {
            warn!(?surface, "too many frame callbacks queued");
            return Err(CompositorError::NoMemory);
        }
        data.frame_callbacks
            .try_reserve(1)
            .map_err(|_| CompositorError::NoMemory)?;
        data.frame_callbacks.push(FrameCallback { resource: callback });
        trace!(?surface, ?callback, "frame callback queued");
        Ok(())
    }

    /// Drop a queued frame callback without firing it
    ///
    /// Used when the client side of the callback is destroyed first.
    pub fn cancel_frame(&mut self, surface: SurfaceId, callback: ObjectId) {
        if let Some(data) = self.surfaces.get_mut(surface) {
            data.frame_callbacks.retain(|cb| cb.resource != callback);
        }
    }

    /// Stage a buffer scale for the next commit
    pub fn set_buffer_scale(&mut self, surface: SurfaceId, scale: i32) -> Result<(), CompositorError> {
        if scale < 1 {
            return Err(CompositorError::InvalidScale(scale));
        }
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        data.pending.buffer_scale = Some(scale);
        Ok(())
    }

    /// Stage a buffer transform for the next commit
    pub fn set_buffer_transform(
        &mut self,
        surface: SurfaceId,
        transform: Transform,
    ) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        data.pending.buffer_transform = Some(transform);
        Ok(())
    }

    /// Apply the pending state of a surface
    #[instrument(level = "trace", skip(self, handler))]
    #[profiling::function]
    pub fn commit<H: CompositorHandler>(
        &mut self,
        surface: SurfaceId,
        handler: &mut H,
    ) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        let pending = &mut data.pending;
        let current = &mut data.current;

        if pending.new_attach {
            let buffer = pending.slot.buffer();
            self.buffers.reference(&mut current.slot, buffer, &mut self.events)?;

            if let Err(err) = self.pixmaps.bind(data.pixmap, buffer) {
                error!(?surface, ?err, "failed to bind buffer to surface pixmap");
            }
            self.pixmaps.refresh(data.pixmap, &self.buffers);
            handler.buffer_bound(surface, data.pixmap);
            data.changes |= SurfaceChanges::BUFFER;

            current.offset = pending.offset;
            current.buffer_size = pending.buffer_size;
        }

        if let Some(scale) = pending.buffer_scale.take() {
            current.buffer_scale = scale;
        }
        if let Some(transform) = pending.buffer_transform.take() {
            current.buffer_transform = transform;
        }
        let size = current
            .buffer_size
            .to_logical(current.buffer_scale, current.buffer_transform);
        let size_changed = size != current.size;
        if size_changed {
            current.size = size;
            data.changes |= SurfaceChanges::SIZE;
        }

        if pending.new_attach {
            let attached = current.slot.buffer().is_some();

            if attached && size_changed {
                if let Some(shell) = data.shell.as_mut() {
                    debug!(?surface, ?size, "configure");
                    shell.configure(size);
                }
            }

            if attached != data.mapped {
                data.mapped = attached;
                data.changes |= SurfaceChanges::MAPPED;
                debug!(?surface, mapped = attached, "map state changed");
                if let Some(shell) = data.shell.as_mut() {
                    if attached {
                        shell.map();
                    } else {
                        shell.unmap();
                    }
                }
            }

            if let Err(err) = self.buffers.reference(&mut pending.slot, None, &mut self.events) {
                error!(?surface, ?err, "failed to clear pending buffer");
            }
            pending.new_attach = false;
            pending.offset = Default::default();
            pending.buffer_size = Default::default();
        }

        let surface_rect = current.rect();

        if handler.has_render_target(surface) {
            let mut damage = pending.damage.intersect_rect(surface_rect).rects().to_vec();
            self.shaper.shape_damage(&mut damage);
            for rect in damage {
                handler.damage(surface, rect);
            }
            pending.damage.clear();
        }

        current.input_rects = materialize(pending.input.as_ref(), self.config.null_input_region, surface_rect);
        current.opaque_rects = materialize(pending.opaque.as_ref(), self.config.null_opaque_region, surface_rect);
        data.changes |= SurfaceChanges::INPUT_SHAPE | SurfaceChanges::OPAQUE;

        handler.commit(surface);
        Ok(())
    }

    /*
     * Compositor-side entry points
     */

    /// A render pass completed
    ///
    /// Fires every queued frame callback with the given timestamp (in milliseconds) and
    /// releases the committed buffer of every surface.
    #[instrument(level = "trace", skip(self))]
    pub fn render_complete(&mut self, time: u32) {
        for (surface, data) in self.surfaces.iter_mut() {
            for callback in data.frame_callbacks.drain(..) {
                let client = callback.resource.client;
                let id = callback.resource.protocol_id;
                self.events.push((client, Event::CallbackDone { callback: id, time }));
                self.events.push((client, Event::DeleteId { id }));
            }
            if let Err(err) = self
                .buffers
                .reference(&mut data.current.slot, None, &mut self.events)
            {
                error!(?surface, ?err, "failed to release rendered buffer");
            }
        }
    }

    /// A render pass completed, timestamped with the given clock
    pub fn render_complete_now(&mut self, clock: &Clock<Monotonic>) {
        self.render_complete(clock.now().as_millis());
    }

    /// Bind a shell to a surface, returning the one bound before
    pub fn bind_shell(
        &mut self,
        surface: SurfaceId,
        shell: Box<dyn ShellSurface>,
    ) -> Result<Option<Box<dyn ShellSurface>>, CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        Ok(data.shell.replace(shell))
    }

    /// Unbind the shell of a surface
    pub fn unbind_shell(&mut self, surface: SurfaceId) -> Option<Box<dyn ShellSurface>> {
        self.surfaces.get_mut(surface)?.shell.take()
    }

    /// The surface received focus
    pub fn activate(&mut self, surface: SurfaceId) -> Result<(), CompositorError> {
        self.with_shell(surface, |shell| shell.activate())
    }

    /// The surface lost focus
    pub fn deactivate(&mut self, surface: SurfaceId) -> Result<(), CompositorError> {
        self.with_shell(surface, |shell| shell.deactivate())
    }

    /// Ping the client of a surface through its shell
    pub fn ping(&mut self, surface: SurfaceId) -> Result<(), CompositorError> {
        self.with_shell(surface, |shell| shell.ping())
    }

    fn with_shell(
        &mut self,
        surface: SurfaceId,
        f: impl FnOnce(&mut dyn ShellSurface),
    ) -> Result<(), CompositorError> {
        let data = self.surfaces.get_mut(surface).ok_or(CompositorError::DeadSurface)?;
        if let Some(shell) = data.shell.as_mut() {
            f(shell.as_mut());
        }
        Ok(())
    }

    /// Take the changes accumulated by commits of a surface
    pub fn surface_changes(&mut self, surface: SurfaceId) -> SurfaceChanges {
        self.surfaces
            .get_mut(surface)
            .map(|data| std::mem::replace(&mut data.changes, SurfaceChanges::empty()))
            .unwrap_or(SurfaceChanges::empty())
    }
}

// Clip a pending region to the surface, resolving a null region with its policy
fn materialize(
    region: Option<&Region>,
    null: NullRegion,
    surface_rect: Rectangle<i32, Logical>,
) -> Vec<Rectangle<i32, Logical>> {
    match (region, null) {
        (Some(region), _) => region.intersect_rect(surface_rect).rects().to_vec(),
        (None, NullRegion::FullSurface) if !surface_rect.is_empty() => vec![surface_rect],
        (None, _) => Vec::new(),
    }
}

#[cfg(test)]
mod tests;
