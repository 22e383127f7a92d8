//! Buffer management utilities.
//!
//! Clients submit pixel data as buffer resources which they own and may destroy at any
//! time. The [`BufferRegistry`] wraps each such resource in an entry that counts how many
//! surface state slots currently reference it (its *busy count*). When that count drops
//! back to zero a `release` event is queued for the owning client, telling it the buffer
//! may be reused.
//!
//! A slot never holds a pointer to the buffer: it holds a generational [`BufferId`] and
//! is registered as an observer of the entry. When the client destroys the resource,
//! [`BufferRegistry::destroy`] hands the observers back to the caller so each slot can
//! forget the buffer, and every [`BufferId`] that was issued for it goes stale.

use std::collections::HashMap;

use tracing::{debug, error, trace};

use crate::{
    compositor::SurfaceId,
    protocol::{ClientId, Event, EventQueue, ObjectId},
    utils::{
        arena::{arena_key, Arena},
        Buffer as BufferCoords, Size,
    },
};

pub mod format;

pub use drm_fourcc::DrmFourcc as Fourcc;

arena_key!(
    /// Handle to a buffer entry of a [`BufferRegistry`]
    BufferId
);

/// Errors of the buffer registry
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The entry could not be allocated
    #[error("not enough memory to track the buffer")]
    NoMemory,
    /// The buffer handle does not refer to a live buffer
    #[error("the buffer is unknown or was destroyed")]
    Unknown,
}

/// Attributes of a shared-memory buffer, as announced at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAttributes {
    /// Offset of the start of the buffer relative to the beginning of the pool in bytes
    pub offset: i32,
    /// Width of the buffer in pixels
    pub width: i32,
    /// Height of the buffer in pixels
    pub height: i32,
    /// Stride of the buffer in bytes
    pub stride: i32,
    /// shm format code of the buffer
    pub format: u32,
}

impl BufferAttributes {
    /// Size of the buffer in buffer coordinates
    ///
    /// Negative dimensions read as zero.
    pub fn size(&self) -> Size<i32, BufferCoords> {
        (self.width.max(0), self.height.max(0)).into()
    }

    /// Pixel format of the buffer, if known
    pub fn fourcc(&self) -> Option<Fourcc> {
        format::from_shm_code(self.format)
    }

    /// Check the attributes describe a valid buffer
    ///
    /// The format must be known and the stride must hold a full row of pixels.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.width <= 0 || self.height <= 0 || self.offset < 0 {
            return Err("invalid buffer dimensions");
        }
        let bpp = self
            .fourcc()
            .and_then(format::get_bpp)
            .ok_or("unsupported buffer format")?;
        let row = (self.width as i64 * bpp as i64 + 7) / 8;
        if (self.stride as i64) < row {
            return Err("buffer stride smaller than a row");
        }
        Ok(())
    }
}

/// Which snapshot of a surface a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// The state staged by `attach` but not yet committed
    Pending,
    /// The committed state
    Current,
}

/// Identity of a buffer slot, used to register it as an observer of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Surface owning the slot
    pub surface: SurfaceId,
    /// Snapshot the slot belongs to
    pub kind: SlotKind,
}

/// A counted reference from surface state to a buffer
///
/// Slots are only changed through [`BufferRegistry::reference`], which keeps the busy
/// count and the observer list of the buffers in sync with them.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferSlot {
    key: SlotKey,
    buffer: Option<BufferId>,
}

impl BufferSlot {
    /// Create an empty slot
    pub fn new(surface: SurfaceId, kind: SlotKind) -> BufferSlot {
        BufferSlot {
            key: SlotKey { surface, kind },
            buffer: None,
        }
    }

    /// Identity of this slot
    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// The referenced buffer, if any
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Drop the reference after the buffer was destroyed, without touching any count
    pub(crate) fn forget(&mut self) {
        self.buffer = None;
    }
}

/// Entry tracking one buffer resource
#[derive(Debug)]
pub struct BufferEntry {
    resource: ObjectId,
    attributes: BufferAttributes,
    busy: u32,
    observers: Vec<SlotKey>,
}

impl BufferEntry {
    /// The client resource backing this buffer
    pub fn resource(&self) -> ObjectId {
        self.resource
    }

    /// Client owning this buffer
    pub fn client(&self) -> ClientId {
        self.resource.client
    }

    /// Attributes of the buffer
    pub fn attributes(&self) -> &BufferAttributes {
        &self.attributes
    }

    /// Number of slots referencing this buffer
    pub fn busy(&self) -> u32 {
        self.busy
    }

    /// Slots registered to be told about the destruction of this buffer
    pub fn observers(&self) -> &[SlotKey] {
        &self.observers
    }
}

/// Registry of the buffers referenced by surfaces
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: Arena<BufferId, BufferEntry>,
    by_resource: HashMap<ObjectId, BufferId>,
}

impl BufferRegistry {
    /// Create an empty registry
    pub fn new() -> BufferRegistry {
        BufferRegistry::default()
    }

    /// Number of live buffer entries
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the registry tracks no buffer
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Get the entry of a resource, creating it on first use
    ///
    /// New entries start with a busy count of zero.
    pub fn get_or_create(
        &mut self,
        resource: ObjectId,
        attributes: BufferAttributes,
    ) -> Result<BufferId, BufferError> {
        if let Some(id) = self.by_resource.get(&resource) {
            return Ok(*id);
        }

        self.by_resource.try_reserve(1).map_err(|_| BufferError::NoMemory)?;
        let id = self
            .buffers
            .try_insert(BufferEntry {
                resource,
                attributes,
                busy: 0,
                observers: Vec::new(),
            })
            .map_err(|_| BufferError::NoMemory)?;
        self.by_resource.insert(resource, id);
        trace!(?resource, ?id, "tracking new buffer");
        Ok(id)
    }

    /// Find the entry of a resource
    pub fn lookup(&self, resource: ObjectId) -> Option<BufferId> {
        self.by_resource.get(&resource).copied()
    }

    /// Access a buffer entry
    ///
    /// Returns `None` once the buffer has been destroyed.
    pub fn get(&self, id: BufferId) -> Option<&BufferEntry> {
        self.buffers.get(id)
    }

    /// Busy count of a buffer, `None` if it was destroyed
    pub fn busy(&self, id: BufferId) -> Option<u32> {
        self.buffers.get(id).map(|entry| entry.busy)
    }

    /// Point a slot to a new buffer (or to none)
    ///
    /// The previously referenced buffer loses one busy count, and the slot stops
    /// observing it. If that was its last reference, a release event is queued for its
    /// client. The new buffer gains one busy count and the slot starts observing it.
    ///
    /// Nothing is changed if `buffer` is already the one referenced by the slot, or if
    /// an error is returned.
    #[profiling::function]
    pub fn reference(
        &mut self,
        slot: &mut BufferSlot,
        buffer: Option<BufferId>,
        events: &mut EventQueue,
    ) -> Result<(), BufferError> {
        if slot.buffer == buffer {
            return Ok(());
        }

        if let Some(new) = buffer {
            let entry = self.buffers.get_mut(new).ok_or(BufferError::Unknown)?;
            entry.observers.try_reserve(1).map_err(|_| BufferError::NoMemory)?;
        }
        events.try_reserve(1).map_err(|_| BufferError::NoMemory)?;

        if let Some(old) = slot.buffer.take() {
            match self.buffers.get_mut(old) {
                Some(entry) => {
                    if let Some(pos) = entry.observers.iter().position(|key| *key == slot.key) {
                        entry.observers.swap_remove(pos);
                    }
                    if entry.busy == 0 {
                        error!(buffer = ?old, "buffer referenced by a slot has no busy count");
                    } else {
                        entry.busy -= 1;
                        if entry.busy == 0 {
                            debug!(buffer = ?old, resource = ?entry.resource, "releasing buffer");
                            events.push((
                                entry.resource.client,
                                Event::BufferRelease {
                                    buffer: entry.resource.protocol_id,
                                },
                            ));
                        }
                    }
                }
                None => error!(buffer = ?old, "slot referenced a buffer that was destroyed"),
            }
        }

        if let Some(new) = buffer {
            if let Some(entry) = self.buffers.get_mut(new) {
                entry.busy += 1;
                entry.observers.push(slot.key);
            }
        }

        slot.buffer = buffer;
        Ok(())
    }

    /// Stop tracking a buffer whose resource was destroyed by its client
    ///
    /// Returns the slots that were still referencing it. Each of them must forget the
    /// buffer with [`BufferSlot::forget`]; no release event is sent for a destroyed
    /// buffer.
    pub fn destroy(&mut self, resource: ObjectId) -> Vec<SlotKey> {
        let Some(id) = self.by_resource.remove(&resource) else {
            return Vec::new();
        };
        match self.buffers.remove(id) {
            Some(entry) => {
                debug!(?resource, observers = entry.observers.len(), "buffer destroyed");
                entry.observers
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::SurfaceId;
    use crate::utils::arena::ArenaKey;

    fn attributes() -> BufferAttributes {
        BufferAttributes {
            offset: 0,
            width: 64,
            height: 32,
            stride: 256,
            format: 0,
        }
    }

    fn resource(id: u32) -> ObjectId {
        ObjectId {
            client: ClientId::from_parts(0, 0),
            protocol_id: id,
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut registry = BufferRegistry::new();
        let a = registry.get_or_create(resource(3), attributes()).unwrap();
        let b = registry.get_or_create(resource(3), attributes()).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.busy(a), Some(0));
    }

    #[test]
    fn release_on_last_reference() {
        let mut registry = BufferRegistry::new();
        let mut events = EventQueue::new();
        let surface = SurfaceId::from_parts(0, 0);
        let buffer = registry.get_or_create(resource(3), attributes()).unwrap();

        let mut pending = BufferSlot::new(surface, SlotKind::Pending);
        let mut current = BufferSlot::new(surface, SlotKind::Current);
        registry.reference(&mut pending, Some(buffer), &mut events).unwrap();
        registry.reference(&mut current, Some(buffer), &mut events).unwrap();
        assert_eq!(registry.busy(buffer), Some(2));
        assert_eq!(registry.get(buffer).unwrap().observers().len(), 2);

        // same buffer again is a no-op
        registry.reference(&mut current, Some(buffer), &mut events).unwrap();
        assert_eq!(registry.busy(buffer), Some(2));

        registry.reference(&mut pending, None, &mut events).unwrap();
        assert!(events.is_empty());
        registry.reference(&mut current, None, &mut events).unwrap();
        assert_eq!(registry.busy(buffer), Some(0));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].1, Event::BufferRelease { buffer: 3 }));
        assert!(registry.get(buffer).unwrap().observers().is_empty());
    }

    #[test]
    fn destroy_returns_observers_and_invalidates() {
        let mut registry = BufferRegistry::new();
        let mut events = EventQueue::new();
        let surface = SurfaceId::from_parts(1, 0);
        let buffer = registry.get_or_create(resource(7), attributes()).unwrap();
        let mut current = BufferSlot::new(surface, SlotKind::Current);
        registry.reference(&mut current, Some(buffer), &mut events).unwrap();

        let observers = registry.destroy(resource(7));
        assert_eq!(observers, vec![current.key()]);
        assert_eq!(registry.busy(buffer), None);
        assert!(registry.lookup(resource(7)).is_none());

        current.forget();
        assert!(events.is_empty());

        let mut pending = BufferSlot::new(surface, SlotKind::Pending);
        assert!(matches!(
            registry.reference(&mut pending, Some(buffer), &mut events),
            Err(BufferError::Unknown)
        ));
        assert_eq!(pending.buffer(), None);
    }

    #[test]
    fn attribute_validation() {
        assert!(attributes().validate().is_ok());
        let narrow = BufferAttributes {
            stride: 100,
            ..attributes()
        };
        assert!(narrow.validate().is_err());
        let unknown = BufferAttributes {
            format: 0xdead_beef,
            ..attributes()
        };
        assert!(unknown.validate().is_err());
    }
}
