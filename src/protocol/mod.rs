//! Protocol object bridge
//!
//! The [`Display`] owns the [`CompositorState`] and the object tables of all connected
//! clients. It translates client requests, addressed by protocol object ids, into
//! compositor operations, and routes the events produced by the compositor back to the
//! clients owning the objects they concern.
//!
//! Errors are handled here and never reach further:
//!
//! - a protocol violation (unknown object, object of the wrong interface, invalid
//!   argument) posts an [`Event::Error`] to the client and terminates it: every object
//!   it owns is destroyed, in reverse creation order;
//! - a resource exhaustion aborts the request and posts [`Event::NoMemory`], the client
//!   stays connected.
//!
//! ```
//! use tilecomp::{
//!     buffer::BufferAttributes,
//!     compositor::CompositorHandler,
//!     config::CompositorConfig,
//!     protocol::{CompositorRequest, Display, Event, Request, SurfaceRequest},
//!     utils::{Logical, Rectangle},
//! };
//! # use tilecomp::compositor::SurfaceId;
//!
//! struct Renderer;
//! impl CompositorHandler for Renderer {
//!     fn damage(&mut self, _surface: SurfaceId, _rect: Rectangle<i32, Logical>) {}
//! }
//!
//! let mut display = Display::new(CompositorConfig::default());
//! let client = display.create_client(1234).unwrap();
//! display.dispatch(client, Request::BindCompositor { id: 1 }, &mut Renderer).unwrap();
//! display
//!     .dispatch(
//!         client,
//!         Request::Compositor { compositor: 1, request: CompositorRequest::CreateSurface { id: 2 } },
//!         &mut Renderer,
//!     )
//!     .unwrap();
//! let attributes = BufferAttributes { offset: 0, width: 4, height: 4, stride: 16, format: 0 };
//! display.create_buffer(client, 3, attributes).unwrap();
//! for request in [
//!     SurfaceRequest::Attach { buffer: Some(3), x: 0, y: 0 },
//!     SurfaceRequest::Frame { callback: 4 },
//!     SurfaceRequest::Commit,
//! ] {
//!     display.dispatch(client, Request::Surface { surface: 2, request }, &mut Renderer).unwrap();
//! }
//! display.render_complete(16);
//! let events = display.take_events(client);
//! assert!(events.contains(&Event::CallbackDone { callback: 4, time: 16 }));
//! assert!(events.contains(&Event::BufferRelease { buffer: 3 }));
//! ```

use tracing::{debug, trace, warn};

use crate::{
    buffer::{BufferAttributes, BufferId},
    compositor::{CompositorError, CompositorHandler, CompositorState},
    config::CompositorConfig,
    utils::{
        arena::{arena_key, Arena},
        Clock, Monotonic,
    },
};

mod client;
mod handlers;

pub use self::client::{Client, Object};
pub use self::handlers::{BufferRequest, CompositorRequest, RegionRequest, Request, SurfaceRequest};

arena_key!(
    /// Handle to a connected client
    ClientId
);

/// A protocol object, identified by its client and its protocol id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    /// Client owning the object
    pub client: ClientId,
    /// Id of the object in the client's object table
    pub protocol_id: u32,
}

/// Events sent to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The compositor no longer uses the buffer
    BufferRelease {
        /// protocol id of the buffer
        buffer: u32,
    },
    /// A frame callback fired
    CallbackDone {
        /// protocol id of the callback
        callback: u32,
        /// timestamp of the render completion, in milliseconds
        time: u32,
    },
    /// The object was destroyed by the server, its id may be reused
    DeleteId {
        /// freed protocol id
        id: u32,
    },
    /// A fatal protocol error, the connection is terminated
    Error {
        /// object the error is about
        object: u32,
        /// interface-specific error code
        code: u32,
        /// human readable description
        message: String,
    },
    /// A request could not be served for lack of resources
    NoMemory,
}

/// Events queued for clients, with the client they are for
pub type EventQueue = Vec<(ClientId, Event)>;

/// Error codes carried by [`Event::Error`]
pub mod error_code {
    /// The request references an unknown object, or one of the wrong interface
    pub const INVALID_OBJECT: u32 = 0;
    /// The request is malformed
    pub const INVALID_METHOD: u32 = 1;
    /// surface: the buffer scale is not positive
    pub const INVALID_SCALE: u32 = 0;
    /// surface: the buffer transform is unknown
    pub const INVALID_TRANSFORM: u32 = 1;
    /// shm: the buffer format is unknown
    pub const INVALID_FORMAT: u32 = 0;
    /// shm: the buffer dimensions or stride are invalid
    pub const INVALID_STRIDE: u32 = 2;
}

/// Errors of request dispatching
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The client broke the protocol and was disconnected
    #[error("protocol error on object {object} (code {code}): {message}")]
    ProtocolViolation {
        /// object the error is about
        object: u32,
        /// interface-specific error code
        code: u32,
        /// human readable description
        message: String,
    },
    /// The request was aborted for lack of resources
    #[error("not enough memory to serve the request")]
    NoMemory,
    /// The client is not connected
    #[error("the client is not connected")]
    DeadClient,
}

impl DispatchError {
    pub(crate) fn violation(object: u32, code: u32, message: impl Into<String>) -> DispatchError {
        DispatchError::ProtocolViolation {
            object,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn from_compositor(object: u32, err: CompositorError) -> DispatchError {
        match err {
            CompositorError::NoMemory => DispatchError::NoMemory,
            CompositorError::InvalidScale(scale) => DispatchError::violation(
                object,
                error_code::INVALID_SCALE,
                format!("buffer scale {} is not positive", scale),
            ),
            err => DispatchError::violation(object, error_code::INVALID_OBJECT, err.to_string()),
        }
    }
}

/// Server side of the connections of all clients
#[derive(Debug)]
pub struct Display {
    compositor: CompositorState,
    clients: Arena<ClientId, Client>,
}

impl Display {
    /// Create a display with no client
    pub fn new(config: CompositorConfig) -> Display {
        Display {
            compositor: CompositorState::new(config),
            clients: Arena::new(),
        }
    }

    /// Access the compositor state
    pub fn compositor(&self) -> &CompositorState {
        &self.compositor
    }

    /// Mutably access the compositor state
    ///
    /// Events produced through this access are routed on the next call into the display.
    pub fn compositor_mut(&mut self) -> &mut CompositorState {
        &mut self.compositor
    }

    /// Access a connected client
    pub fn client(&self, client: ClientId) -> Option<&Client> {
        self.clients.get(client)
    }

    /// Accept a new client connection
    pub fn create_client(&mut self, pid: u32) -> Result<ClientId, DispatchError> {
        let client = self
            .clients
            .try_insert(Client::new(pid))
            .map_err(|_| DispatchError::NoMemory)?;
        debug!(?client, pid, "new client");
        Ok(client)
    }

    /// Create the buffer object `id` of a client, on behalf of the shm global
    pub fn create_buffer(
        &mut self,
        client: ClientId,
        id: u32,
        attributes: BufferAttributes,
    ) -> Result<BufferId, DispatchError> {
        let result = self.try_create_buffer(client, id, attributes);
        self.finish(client, result)
    }

    fn try_create_buffer(
        &mut self,
        client: ClientId,
        id: u32,
        attributes: BufferAttributes,
    ) -> Result<BufferId, DispatchError> {
        self.reserve_object(client, id)?;
        if let Err(message) = attributes.validate() {
            let code = if attributes.fourcc().is_none() {
                error_code::INVALID_FORMAT
            } else {
                error_code::INVALID_STRIDE
            };
            return Err(DispatchError::violation(id, code, message));
        }
        let resource = ObjectId {
            client,
            protocol_id: id,
        };
        let buffer = self
            .compositor
            .create_buffer(resource, attributes)
            .map_err(|err| DispatchError::from_compositor(id, err))?;
        self.insert_object(client, id, Object::Buffer(buffer));
        Ok(buffer)
    }

    /// Handle a request of a client
    ///
    /// On a protocol violation the client is terminated; on resource exhaustion the
    /// request has no effect. Both are also reported to the client.
    pub fn dispatch<H: CompositorHandler>(
        &mut self,
        client: ClientId,
        request: Request,
        handler: &mut H,
    ) -> Result<(), DispatchError> {
        trace!(?client, ?request, "dispatching request");
        let result = self.handle_request(client, request, handler);
        self.finish(client, result)
    }

    /// A render pass completed, see [`CompositorState::render_complete`]
    pub fn render_complete(&mut self, time: u32) {
        self.compositor.render_complete(time);
        self.route_events();
    }

    /// A render pass completed, timestamped with the given clock
    pub fn render_complete_now(&mut self, clock: &Clock<Monotonic>) {
        self.compositor.render_complete_now(clock);
        self.route_events();
    }

    /// Retrieve the events queued for a client
    ///
    /// Once the last events of a terminated client are retrieved, it is forgotten.
    pub fn take_events(&mut self, client: ClientId) -> Vec<Event> {
        self.route_events();
        let Some(data) = self.clients.get_mut(client) else {
            return Vec::new();
        };
        let events = std::mem::take(data.events_mut());
        if data.is_closed() {
            self.clients.remove(client);
        }
        events
    }

    /// The connection of a client was closed
    ///
    /// All objects of the client are destroyed in reverse creation order.
    pub fn disconnect(&mut self, client: ClientId) {
        let Some(data) = self.clients.get_mut(client) else {
            return;
        };
        let objects = data.close();
        debug!(?client, objects = objects.len(), "client disconnected");
        self.destroy_objects(client, objects);
        self.clients.remove(client);
        self.route_events();
    }

    fn finish<T>(&mut self, client: ClientId, result: Result<T, DispatchError>) -> Result<T, DispatchError> {
        match &result {
            Err(DispatchError::ProtocolViolation { object, code, message }) => {
                warn!(?client, object, code, message, "protocol error, terminating client");
                if let Some(data) = self.clients.get_mut(client) {
                    data.events_mut().push(Event::Error {
                        object: *object,
                        code: *code,
                        message: message.clone(),
                    });
                    let objects = data.close();
                    self.destroy_objects(client, objects);
                }
            }
            Err(DispatchError::NoMemory) => {
                warn!(?client, "out of resources, request aborted");
                if let Some(data) = self.clients.get_mut(client) {
                    data.events_mut().push(Event::NoMemory);
                }
            }
            _ => {}
        }
        self.route_events();
        result
    }

    fn destroy_objects(&mut self, client: ClientId, objects: Vec<(u32, Object)>) {
        for (id, object) in objects {
            self.destroy_object(client, id, object);
        }
    }

    pub(crate) fn destroy_object(&mut self, client: ClientId, id: u32, object: Object) {
        let resource = ObjectId {
            client,
            protocol_id: id,
        };
        let result = match object {
            Object::Compositor => Ok(()),
            Object::Surface(surface) => self.compositor.destroy_surface(surface),
            Object::Region(region) => self.compositor.destroy_region(region),
            Object::Buffer(_) => {
                self.compositor.destroy_buffer(resource);
                Ok(())
            }
            Object::Callback(surface) => {
                self.compositor.cancel_frame(surface, resource);
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(?resource, ?err, "object was already gone");
        }
    }

    // Move the events produced by the compositor to the queues of their clients
    fn route_events(&mut self) {
        for (client, event) in self.compositor.take_events() {
            let Some(data) = self.clients.get_mut(client) else {
                trace!(?client, ?event, "dropping event for a gone client");
                continue;
            };
            if data.is_closed() {
                continue;
            }
            if let Event::DeleteId { id } = event {
                data.objects_mut().shift_remove(&id);
            }
            data.events_mut().push(event);
        }
    }

    /*
     * Object table helpers
     */

    pub(crate) fn lookup(&self, client: ClientId, id: u32) -> Result<Object, DispatchError> {
        let data = self.clients.get(client).ok_or(DispatchError::DeadClient)?;
        data.object(id).ok_or_else(|| {
            DispatchError::violation(id, error_code::INVALID_OBJECT, format!("unknown object {}", id))
        })
    }

    /// Check a new object `id` can be created for the client
    pub(crate) fn reserve_object(&mut self, client: ClientId, id: u32) -> Result<(), DispatchError> {
        let limit = self.compositor.config().max_objects_per_client;
        let data = self.clients.get_mut(client).ok_or(DispatchError::DeadClient)?;
        if data.is_closed() {
            return Err(DispatchError::DeadClient);
        }
        if id == 0 || data.object(id).is_some() {
            return Err(DispatchError::violation(
                id,
                error_code::INVALID_OBJECT,
                format!("object id {} is not free", id),
            ));
        }
        if data.object_count() >= limit {
            return Err(DispatchError::NoMemory);
        }
        data.objects_mut()
            .try_reserve(1)
            .map_err(|_| DispatchError::NoMemory)
    }

    pub(crate) fn insert_object(&mut self, client: ClientId, id: u32, object: Object) {
        if let Some(data) = self.clients.get_mut(client) {
            trace!(?client, id, interface = object.interface(), "new object");
            data.objects_mut().insert(id, object);
        }
    }

    pub(crate) fn remove_object(&mut self, client: ClientId, id: u32) {
        if let Some(data) = self.clients.get_mut(client) {
            data.objects_mut().shift_remove(&id);
            data.events_mut().push(Event::DeleteId { id });
        }
    }

    pub(crate) fn pid(&self, client: ClientId) -> u32 {
        self.clients.get(client).map(|data| data.pid()).unwrap_or(0)
    }
}
