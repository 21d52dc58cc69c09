// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Descriptors of texture memory as the guest sees it.

use std::ptr::NonNull;

use crate::error::Error;
use crate::format::{Dimensions, Format};

/// The byte layouts the guest GPU can tile a surface with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileMode {
    Linear,
    Pitch,
    Block,
}

impl TileMode {
    /// Decodes a tile mode as read from a guest register.
    ///
    /// Unknown values are rejected rather than treated as linear.
    pub fn from_raw(raw: u32) -> Result<TileMode, Error> {
        match raw {
            0 => Ok(TileMode::Linear),
            1 => Ok(TileMode::Pitch),
            2 => Ok(TileMode::Block),
            other => Err(Error::UnsupportedTileMode(other)),
        }
    }
}

/// A tile mode together with the parameters it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileConfig {
    Linear,
    /// Rows are `pitch` texels apart.
    Pitch { pitch: u32 },
    /// Blocks are `block_height` GOBs tall.
    Block { block_height: u32 },
}

impl TileConfig {
    /// Decodes a raw tile mode and its mode-specific parameter.
    ///
    /// `parameter` is the pitch in texels for pitch-linear surfaces and the block height in
    /// GOBs for block-linear surfaces; it is ignored for linear surfaces.
    pub fn from_raw(mode: u32, parameter: u32) -> Result<TileConfig, Error> {
        Ok(match TileMode::from_raw(mode)? {
            TileMode::Linear => TileConfig::Linear,
            TileMode::Pitch => TileConfig::Pitch { pitch: parameter },
            TileMode::Block => TileConfig::Block {
                block_height: parameter,
            },
        })
    }

    pub fn mode(&self) -> TileMode {
        match self {
            TileConfig::Linear => TileMode::Linear,
            TileConfig::Pitch { .. } => TileMode::Pitch,
            TileConfig::Block { .. } => TileMode::Block,
        }
    }
}

/// A span of guest memory backing (part of) a texture.
///
/// The span is owned by the guest address space; this type only records where it is.
#[derive(Debug, Clone, Copy)]
pub struct GuestMapping {
    ptr: NonNull<u8>,
    len: usize,
}

// The guest address space serializes its own mutations; a mapping is just an address range.
unsafe impl Send for GuestMapping {}
unsafe impl Sync for GuestMapping {}

impl GuestMapping {
    /// Records a span of guest memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as any texture
    /// built from this mapping is alive.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        GuestMapping { ptr, len }
    }

    /// Creates a mapping over memory that lives for the rest of the program.
    pub fn from_static(memory: &'static mut [u8]) -> Self {
        let len = memory.len();
        GuestMapping {
            ptr: NonNull::from(memory).cast(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Views the guest bytes.
    ///
    /// # Safety
    ///
    /// No other thread may write the span while the returned slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Views the guest bytes mutably.
    ///
    /// # Safety
    ///
    /// No other reference to the span may be alive while the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Everything the guest tells us about a texture.
#[derive(Debug, Clone)]
pub struct GuestTexture {
    pub dimensions: Dimensions,
    pub format: Format,
    pub tile_config: TileConfig,
    /// Where the tiled bytes live, in guest address order.
    pub mappings: Vec<GuestMapping>,
    pub layer_count: u32,
}

impl GuestTexture {
    pub fn new(
        dimensions: Dimensions,
        format: Format,
        tile_config: TileConfig,
        mappings: Vec<GuestMapping>,
    ) -> Self {
        GuestTexture {
            dimensions,
            format,
            tile_config,
            mappings,
            layer_count: 1,
        }
    }

    pub fn with_layer_count(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }

    /// Bytes of guest memory all layers of the surface occupy.
    pub fn size(&self) -> usize {
        crate::copy::guest_layer_size(self) * self.layer_count as usize
    }

    /// Returns the single mapping synchronization works against.
    ///
    /// Textures spread across several mappings are not supported, and the mapping must be
    /// large enough for the tiled surface.
    pub(crate) fn single_mapping(&self) -> Result<GuestMapping, Error> {
        let mapping = match self.mappings.as_slice() {
            [] => return Err(Error::NoMappings),
            [mapping] => *mapping,
            mappings => return Err(Error::MultipleMappings(mappings.len())),
        };
        let needed = self.size();
        if mapping.len() < needed {
            return Err(Error::GuestMappingTooSmall {
                needed,
                len: mapping.len(),
            });
        }
        Ok(mapping)
    }
}
