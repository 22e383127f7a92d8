//! Shell surface hooks
//!
//! A shell (desktop or window management layer) may bind a [`ShellSurface`] to any
//! surface with [`CompositorState::bind_shell`](crate::compositor::CompositorState::bind_shell).
//! The surface state machine then calls into it at the transitions of a commit, and the
//! window management side forwards focus and ping requests through the compositor.
//!
//! Binding a shell is optional; an unbound surface simply produces no calls.

use crate::utils::{Logical, Size};

/// Window semantics bound to a surface
///
/// All methods default to doing nothing.
pub trait ShellSurface: std::fmt::Debug {
    /// The committed buffer changed size, the client should be reconfigured
    fn configure(&mut self, size: Size<i32, Logical>) {
        let _ = size;
    }

    /// The surface got a buffer after having none
    fn map(&mut self) {}

    /// The surface lost its buffer
    fn unmap(&mut self) {}

    /// The surface received focus
    fn activate(&mut self) {}

    /// The surface lost focus
    fn deactivate(&mut self) {}

    /// Check the client is still responsive
    fn ping(&mut self) {}
}
