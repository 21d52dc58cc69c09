// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Crate-wide error type.

use crate::command::SubresourceRange;
use crate::format::Dimensions;

/// Errors raised by texture operations.
///
/// Precondition errors are raised synchronously before anything is submitted to the GPU.
/// [`Error::Device`] and [`Error::Poisoned`] report backend failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("synchronization requires a guest texture")]
    NoGuestTexture,
    #[error("guest dimensions {guest:?} differ from host dimensions {host:?}")]
    DimensionMismatch { guest: Dimensions, host: Dimensions },
    #[error("guest has {guest} layers but the host texture has {host}")]
    LayerCountMismatch { guest: u32, host: u32 },
    #[error("synchronizing textures across {0} mappings is not supported")]
    MultipleMappings(usize),
    #[error("guest texture has no mappings")]
    NoMappings,
    #[error("guest mapping holds {len} bytes but the surface needs {needed}")]
    GuestMappingTooSmall { needed: usize, len: usize },
    #[error("tile mode {0:#x} is not supported")]
    UnsupportedTileMode(u32),
    #[error("cannot copy from an image with undefined layout")]
    CopyFromUndefined,
    #[error("cannot copy from an image with different dimensions")]
    CopyDimensionMismatch,
    #[error("cannot copy from an image with a different format")]
    CopyFormatMismatch,
    #[error("cannot copy a texture onto itself")]
    CopySelf,
    #[error("copy range {0:?} does not fit both images")]
    CopyRangeOutOfBounds(SubresourceRange),
    #[error("backing {0} differs from the texture")]
    BackingMismatch(&'static str),
    #[error("texture has no backing")]
    NoBacking,
    #[error("device error: {0}")]
    Device(String),
    #[error("texture state lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}
