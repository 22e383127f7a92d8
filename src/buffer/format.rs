//! Format info tables for shared-memory buffer formats.
//!
//! [`has_alpha`] returns true if the format has an alpha channel.
//!
//! ```
//! # use tilecomp::buffer::{Fourcc, format::has_alpha};
//! assert!(has_alpha(Fourcc::Argb8888));
//! assert!(!has_alpha(Fourcc::Xrgb8888));
//! ```
//!
//! [`get_bpp`] returns the number of bits per pixel of a format.
//!
//! ```
//! # use tilecomp::buffer::{Fourcc, format::get_bpp};
//! assert_eq!(get_bpp(Fourcc::Rgb565), Some(16));
//! ```
//!
//! [`from_shm_code`] maps the format code carried by a shm buffer to a [`Fourcc`].

use super::Fourcc;

/// Macro to generate table lookup functions for formats.
macro_rules! format_tables {
    (
        $($fourcc: ident {
            alpha: $alpha: expr,
            bpp: $bpp: expr $(,)?
        }),* $(,)?
    ) => {
        /// Returns true if the format has an alpha channel.
        ///
        /// Surfaces backed by such a format cannot be assumed opaque.
        ///
        /// Unknown formats will always return `false`.
        pub const fn has_alpha(fourcc: Fourcc) -> bool {
            match fourcc {
                $(
                    Fourcc::$fourcc => $alpha,
                )*
                _ => false,
            }
        }

        /// Returns the bits per pixel of the specified format.
        ///
        /// Unknown formats will always return [`None`].
        pub const fn get_bpp(fourcc: Fourcc) -> Option<usize> {
            match fourcc {
                $(Fourcc::$fourcc => Some($bpp),)*
                _ => None,
            }
        }
    };
}

format_tables! {
    // 8-bit bpp RGB
    Rgb332 { alpha: false, bpp: 8 },
    Bgr233 { alpha: false, bpp: 8 },

    // 16-bit bpp RGB, 4 bits per channel
    Argb4444 { alpha: true, bpp: 16 },
    Xrgb4444 { alpha: false, bpp: 16 },
    Abgr4444 { alpha: true, bpp: 16 },
    Xbgr4444 { alpha: false, bpp: 16 },
    Rgba4444 { alpha: true, bpp: 16 },
    Rgbx4444 { alpha: false, bpp: 16 },
    Bgra4444 { alpha: true, bpp: 16 },
    Bgrx4444 { alpha: false, bpp: 16 },

    // 16-bit bpp RGB, 5 bits per color channel, 1 bit for alpha channel
    Argb1555 { alpha: true, bpp: 16 },
    Xrgb1555 { alpha: false, bpp: 16 },
    Abgr1555 { alpha: true, bpp: 16 },
    Xbgr1555 { alpha: false, bpp: 16 },
    Rgba5551 { alpha: true, bpp: 16 },
    Rgbx5551 { alpha: false, bpp: 16 },
    Bgra5551 { alpha: true, bpp: 16 },
    Bgrx5551 { alpha: false, bpp: 16 },

    Rgb565 { alpha: false, bpp: 16 },
    Bgr565 { alpha: false, bpp: 16 },

    // 24-bit bpp RGB
    Rgb888 { alpha: false, bpp: 24 },
    Bgr888 { alpha: false, bpp: 24 },

    // 32-bit bpp RGB, 8 bits per channel
    Argb8888 { alpha: true, bpp: 32 },
    Xrgb8888 { alpha: false, bpp: 32 },
    Abgr8888 { alpha: true, bpp: 32 },
    Xbgr8888 { alpha: false, bpp: 32 },
    Rgba8888 { alpha: true, bpp: 32 },
    Rgbx8888 { alpha: false, bpp: 32 },
    Bgra8888 { alpha: true, bpp: 32 },
    Bgrx8888 { alpha: false, bpp: 32 },

    // 32-bit bpp RGB with 10-bits per color channel
    Argb2101010 { alpha: true, bpp: 32 },
    Xrgb2101010 { alpha: false, bpp: 32 },
    Abgr2101010 { alpha: true, bpp: 32 },
    Xbgr2101010 { alpha: false, bpp: 32 },
    Rgba1010102 { alpha: true, bpp: 32 },
    Rgbx1010102 { alpha: false, bpp: 32 },
    Bgra1010102 { alpha: true, bpp: 32 },
    Bgrx1010102 { alpha: false, bpp: 32 },

    // packed YCbCr with alpha
    Ayuv { alpha: true, bpp: 32 },
}

/// Maps a shm format code to its [`Fourcc`]
///
/// The two mandatory shm formats use the codes 0 and 1, every other format
/// is identified by its fourcc code.
pub fn from_shm_code(code: u32) -> Option<Fourcc> {
    match code {
        0 => Some(Fourcc::Argb8888),
        1 => Some(Fourcc::Xrgb8888),
        code => Fourcc::try_from(code).ok(),
    }
}
