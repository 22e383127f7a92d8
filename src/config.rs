//! Compositor configuration
//!
//! All fields have defaults, so an empty TOML document is a valid configuration:
//!
//! ```
//! # use tilecomp::config::{CompositorConfig, NullRegion};
//! let config = CompositorConfig::from_toml_str(r#"
//!     max_frame_callbacks = 8
//!     null_opaque_region = "full-surface"
//!
//!     [output_size]
//!     width = 1280
//!     height = 720
//! "#).unwrap();
//! assert_eq!(config.output_size.width, 1280);
//! assert_eq!(config.null_opaque_region, NullRegion::FullSurface);
//! assert_eq!(config.max_objects_per_client, 65536);
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::utils::{Logical, Size};

/// Errors when loading a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read configuration file")]
    Io(#[from] std::io::Error),
    /// The document is not a valid configuration
    #[error("invalid configuration")]
    Parse(#[from] toml::de::Error),
}

/// What a null `set_opaque_region` / `set_input_region` resets the region to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NullRegion {
    /// The whole surface
    FullSurface,
    /// Nothing
    Empty,
}

/// Dimensions in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Dimensions {
    /// Width in logical pixels
    pub width: i32,
    /// Height in logical pixels
    pub height: i32,
}

impl From<Dimensions> for Size<i32, Logical> {
    fn from(dim: Dimensions) -> Self {
        (dim.width.max(0), dim.height.max(0)).into()
    }
}

/// Configuration of the compositor core
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Bound of the regions created by clients
    pub output_size: Dimensions,
    /// Maximum number of protocol objects a client may own
    pub max_objects_per_client: usize,
    /// Maximum number of frame callbacks queued on one surface
    pub max_frame_callbacks: usize,
    /// Meaning of a null opaque region
    pub null_opaque_region: NullRegion,
    /// Meaning of a null input region
    pub null_input_region: NullRegion,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        CompositorConfig {
            output_size: Dimensions {
                width: 1920,
                height: 1080,
            },
            max_objects_per_client: 65536,
            max_frame_callbacks: 64,
            null_opaque_region: NullRegion::Empty,
            null_input_region: NullRegion::FullSurface,
        }
    }
}

impl CompositorConfig {
    /// Parse a configuration from a TOML document
    pub fn from_toml_str(document: &str) -> Result<CompositorConfig, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<CompositorConfig, ConfigError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }
}
