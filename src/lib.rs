#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # tilecomp: the surface core of a display compositor
//!
//! This crate implements the server side of the surface protocol of a wayland-style
//! display compositor: the lifecycle of the pixel buffers submitted by clients, the
//! pending/current state machine of surfaces, region tracking for damage, opaque and
//! input areas, and the pixmap handles through which a renderer consumes all of it.
//!
//! Rendering itself, window management and the transport are left to the user of the
//! crate, which plugs in through small traits.
//!
//! ## Structure of the crate
//!
//! - [`region`] is the region tracker, a set of tiles stored as non-overlapping rectangles.
//! - [`buffer`] tracks client buffers and the busy count that gates their release.
//! - [`pixmap`] contains the reference counted pixmap handles and their registry.
//! - [`compositor`] is the surface state machine, with attach, damage, regions, frame
//!   callbacks and the commit transition. Its [`CompositorHandler`](compositor::CompositorHandler)
//!   is the interface to the renderer.
//! - [`shell`] defines the optional [`ShellSurface`](shell::ShellSurface) hooks.
//! - [`protocol`] is the bridge between client requests and the compositor state, and
//!   routes events back to clients.
//! - [`config`] holds the [`CompositorConfig`](config::CompositorConfig).
//!
//! ## General principles
//!
//! Everything runs on a single thread: each request and each notification from the
//! renderer runs to completion before the next one. Objects are referred to by
//! generational handles, so a handle to a destroyed object never aliases a new one and
//! simply resolves to nothing.
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod buffer;
pub mod compositor;
pub mod config;
pub mod pixmap;
pub mod protocol;
pub mod region;
pub mod shell;
pub mod utils;
