use tracing::trace;

use crate::{
    compositor::{CompositorHandler, RegionId, SurfaceId},
    utils::{Rectangle, Transform},
};

use super::{error_code, ClientId, DispatchError, Display, Object, ObjectId};

/// A request sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Bind the compositor global as object `id`
    BindCompositor {
        /// id of the new compositor object
        id: u32,
    },
    /// Request to a compositor object
    Compositor {
        /// compositor object the request is sent to
        compositor: u32,
        /// the request
        request: CompositorRequest,
    },
    /// Request to a surface object
    Surface {
        /// surface object the request is sent to
        surface: u32,
        /// the request
        request: SurfaceRequest,
    },
    /// Request to a region object
    Region {
        /// region object the request is sent to
        region: u32,
        /// the request
        request: RegionRequest,
    },
    /// Request to a buffer object
    Buffer {
        /// buffer object the request is sent to
        buffer: u32,
        /// the request
        request: BufferRequest,
    },
}

/// Requests of the compositor interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorRequest {
    /// Create a surface as object `id`
    CreateSurface {
        /// id of the new surface
        id: u32,
    },
    /// Create a region covering the output as object `id`
    CreateRegion {
        /// id of the new region
        id: u32,
    },
}

/// Requests of the surface interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceRequest {
    /// Stage a buffer (or none) for the next commit
    Attach {
        /// buffer object, or none to unmap
        buffer: Option<u32>,
        /// horizontal offset
        x: i32,
        /// vertical offset
        y: i32,
    },
    /// Mark part of the surface as damaged
    Damage {
        /// left of the damaged rectangle
        x: i32,
        /// top of the damaged rectangle
        y: i32,
        /// width of the damaged rectangle
        width: i32,
        /// height of the damaged rectangle
        height: i32,
    },
    /// Request a frame callback as object `callback`
    Frame {
        /// id of the new callback
        callback: u32,
    },
    /// Merge a region into the opaque region, or reset it
    SetOpaqueRegion {
        /// region object
        region: Option<u32>,
    },
    /// Merge a region into the input region, or reset it
    SetInputRegion {
        /// region object
        region: Option<u32>,
    },
    /// Apply the pending state
    Commit,
    /// Stage a buffer transform
    SetBufferTransform {
        /// wire value of the transform
        transform: i32,
    },
    /// Stage a buffer scale
    SetBufferScale {
        /// the scale
        scale: i32,
    },
    /// Destroy the surface
    Destroy,
}

/// Requests of the region interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionRequest {
    /// Add a rectangle
    Add {
        /// left of the rectangle
        x: i32,
        /// top of the rectangle
        y: i32,
        /// width of the rectangle
        width: i32,
        /// height of the rectangle
        height: i32,
    },
    /// Subtract a rectangle
    Subtract {
        /// left of the rectangle
        x: i32,
        /// top of the rectangle
        y: i32,
        /// width of the rectangle
        width: i32,
        /// height of the rectangle
        height: i32,
    },
    /// Destroy the region
    Destroy,
}

/// Requests of the buffer interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferRequest {
    /// Destroy the buffer
    Destroy,
}

fn wrong_interface(id: u32, object: Object, expected: &str) -> DispatchError {
    DispatchError::violation(
        id,
        error_code::INVALID_OBJECT,
        format!("object {} is a {}, not a {}", id, object.interface(), expected),
    )
}

impl Display {
    pub(super) fn handle_request<H: CompositorHandler>(
        &mut self,
        client: ClientId,
        request: Request,
        handler: &mut H,
    ) -> Result<(), DispatchError> {
        match self.clients.get(client) {
            Some(data) if !data.is_closed() => {}
            _ => return Err(DispatchError::DeadClient),
        }

        match request {
            Request::BindCompositor { id } => {
                self.reserve_object(client, id)?;
                self.insert_object(client, id, Object::Compositor);
                Ok(())
            }
            Request::Compositor { compositor, request } => match self.lookup(client, compositor)? {
                Object::Compositor => self.compositor_request(client, request),
                object => Err(wrong_interface(compositor, object, "wl_compositor")),
            },
            Request::Surface { surface: id, request } => match self.lookup(client, id)? {
                Object::Surface(surface) => self.surface_request(client, id, surface, request, handler),
                object => Err(wrong_interface(id, object, "wl_surface")),
            },
            Request::Region { region: id, request } => match self.lookup(client, id)? {
                Object::Region(region) => self.region_request(client, id, region, request),
                object => Err(wrong_interface(id, object, "wl_region")),
            },
            Request::Buffer { buffer: id, request } => match self.lookup(client, id)? {
                Object::Buffer(_) => match request {
                    BufferRequest::Destroy => {
                        self.compositor.destroy_buffer(ObjectId {
                            client,
                            protocol_id: id,
                        });
                        self.remove_object(client, id);
                        Ok(())
                    }
                },
                object => Err(wrong_interface(id, object, "wl_buffer")),
            },
        }
    }

    /*
     * wl_compositor
     */

    fn compositor_request(&mut self, client: ClientId, request: CompositorRequest) -> Result<(), DispatchError> {
        match request {
            CompositorRequest::CreateSurface { id } => {
                self.reserve_object(client, id)?;
                let pid = self.pid(client);
                let resource = ObjectId {
                    client,
                    protocol_id: id,
                };
                let surface = self
                    .compositor
                    .create_surface(resource, pid)
                    .map_err(|err| DispatchError::from_compositor(id, err))?;
                self.insert_object(client, id, Object::Surface(surface));
                Ok(())
            }
            CompositorRequest::CreateRegion { id } => {
                self.reserve_object(client, id)?;
                let resource = ObjectId {
                    client,
                    protocol_id: id,
                };
                let region = self
                    .compositor
                    .create_region(resource)
                    .map_err(|err| DispatchError::from_compositor(id, err))?;
                self.insert_object(client, id, Object::Region(region));
                Ok(())
            }
        }
    }

    /*
     * wl_surface
     */

    fn surface_request<H: CompositorHandler>(
        &mut self,
        client: ClientId,
        id: u32,
        surface: SurfaceId,
        request: SurfaceRequest,
        handler: &mut H,
    ) -> Result<(), DispatchError> {
        let into_dispatch = |err| DispatchError::from_compositor(id, err);

        match request {
            SurfaceRequest::Attach { buffer, x, y } => {
                let buffer = match buffer {
                    Some(buffer_id) => match self.lookup(client, buffer_id)? {
                        Object::Buffer(buffer) => Some(buffer),
                        object => return Err(wrong_interface(buffer_id, object, "wl_buffer")),
                    },
                    None => None,
                };
                self.compositor
                    .attach(surface, buffer, x, y)
                    .map_err(into_dispatch)
            }
            SurfaceRequest::Damage { x, y, width, height } => self
                .compositor
                .damage(surface, Rectangle::from_raw(x, y, width, height))
                .map_err(into_dispatch),
            SurfaceRequest::Frame { callback } => {
                self.reserve_object(client, callback)?;
                let resource = ObjectId {
                    client,
                    protocol_id: callback,
                };
                self.compositor.frame(surface, resource).map_err(into_dispatch)?;
                self.insert_object(client, callback, Object::Callback(surface));
                Ok(())
            }
            SurfaceRequest::SetOpaqueRegion { region } => {
                let region = self.lookup_region(client, region)?;
                self.compositor
                    .set_opaque_region(surface, region)
                    .map_err(into_dispatch)
            }
            SurfaceRequest::SetInputRegion { region } => {
                let region = self.lookup_region(client, region)?;
                self.compositor
                    .set_input_region(surface, region)
                    .map_err(into_dispatch)
            }
            SurfaceRequest::Commit => self.compositor.commit(surface, handler).map_err(into_dispatch),
            SurfaceRequest::SetBufferTransform { transform } => {
                let transform = Transform::from_wire(transform).ok_or_else(|| {
                    DispatchError::violation(
                        id,
                        error_code::INVALID_TRANSFORM,
                        format!("unknown buffer transform {}", transform),
                    )
                })?;
                self.compositor
                    .set_buffer_transform(surface, transform)
                    .map_err(into_dispatch)
            }
            SurfaceRequest::SetBufferScale { scale } => self
                .compositor
                .set_buffer_scale(surface, scale)
                .map_err(into_dispatch),
            SurfaceRequest::Destroy => {
                trace!(?client, id, "destroying surface");
                self.compositor.destroy_surface(surface).map_err(into_dispatch)?;
                self.remove_object(client, id);
                Ok(())
            }
        }
    }

    fn lookup_region(&self, client: ClientId, region: Option<u32>) -> Result<Option<RegionId>, DispatchError> {
        let Some(id) = region else {
            return Ok(None);
        };
        match self.lookup(client, id)? {
            Object::Region(region) => Ok(Some(region)),
            object => Err(wrong_interface(id, object, "wl_region")),
        }
    }

    /*
     * wl_region
     */

    fn region_request(
        &mut self,
        client: ClientId,
        id: u32,
        region: RegionId,
        request: RegionRequest,
    ) -> Result<(), DispatchError> {
        let into_dispatch = |err| DispatchError::from_compositor(id, err);

        match request {
            RegionRequest::Add { x, y, width, height } => self
                .compositor
                .region_add(region, Rectangle::from_raw(x, y, width, height))
                .map_err(into_dispatch),
            RegionRequest::Subtract { x, y, width, height } => self
                .compositor
                .region_subtract(region, Rectangle::from_raw(x, y, width, height))
                .map_err(into_dispatch),
            RegionRequest::Destroy => {
                self.compositor.destroy_region(region).map_err(into_dispatch)?;
                self.remove_object(client, id);
                Ok(())
            }
        }
    }
}
