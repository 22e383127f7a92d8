use indexmap::IndexMap;

use crate::{
    buffer::BufferId,
    compositor::{RegionId, SurfaceId},
};

use super::Event;

/// A protocol object of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Object {
    /// The compositor global
    Compositor,
    /// A surface
    Surface(SurfaceId),
    /// A region
    Region(RegionId),
    /// A buffer
    Buffer(BufferId),
    /// A frame callback queued on a surface
    Callback(SurfaceId),
}

impl Object {
    /// Name of the interface of this object, for error messages
    pub fn interface(&self) -> &'static str {
        match self {
            Object::Compositor => "wl_compositor",
            Object::Surface(_) => "wl_surface",
            Object::Region(_) => "wl_region",
            Object::Buffer(_) => "wl_buffer",
            Object::Callback(_) => "wl_callback",
        }
    }
}

/// A connected client
#[derive(Debug)]
pub struct Client {
    pid: u32,
    objects: IndexMap<u32, Object>,
    events: Vec<Event>,
    closed: bool,
}

impl Client {
    pub(super) fn new(pid: u32) -> Client {
        Client {
            pid,
            objects: IndexMap::new(),
            events: Vec::new(),
            closed: false,
        }
    }

    /// Process id of the client
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the connection was terminated after a protocol error
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Look up an object by protocol id
    pub fn object(&self, id: u32) -> Option<Object> {
        self.objects.get(&id).copied()
    }

    /// Number of live objects of the client
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub(super) fn objects_mut(&mut self) -> &mut IndexMap<u32, Object> {
        &mut self.objects
    }

    pub(super) fn events_mut(&mut self) -> &mut Vec<Event> {
        &mut self.events
    }

    pub(super) fn close(&mut self) -> Vec<(u32, Object)> {
        self.closed = true;
        self.objects.drain(..).rev().collect()
    }
}
