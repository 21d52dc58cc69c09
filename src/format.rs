// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Runtime texture formats and surface dimensions.
//!
//! Guest formats are decoded from GPU registers at runtime, so unlike a compile-time pixel type
//! a [`Format`] is a small value that can be compared, hashed and carried around in descriptors.
//! Each format describes a *block*: a single texel for uncompressed formats, or a compressed
//! tile (4x4 for the BCn family).
//!
//! ```
//! use guest_textures::format::{self, Dimensions};
//!
//! let dimensions = Dimensions::new_2d(16, 16);
//! assert_eq!(format::R8G8B8A8_UNORM.size(dimensions), 16 * 16 * 4);
//! // 4x4 blocks of 8 bytes
//! assert_eq!(format::BC1_RGBA_UNORM.size(dimensions), 4 * 4 * 8);
//! ```

bitflags::bitflags! {
    /// Which aspects of an image a format carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// The host format an image is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatId {
    R8Unorm,
    R8G8Unorm,
    R5G6B5Unorm,
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    R16G16B16A16Float,
    R32Float,
    R32G32B32A32Float,
    D32Float,
    D24UnormS8Uint,
    Bc1RgbaUnorm,
    Bc3Unorm,
}

/// Describes how texel data is laid out for a single format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format {
    pub id: FormatId,
    /// Bytes per block.
    pub bpb: u32,
    /// Width of a block in texels.
    pub block_width: u32,
    /// Height of a block in texels.
    pub block_height: u32,
    pub aspect: ImageAspect,
}

impl Format {
    const fn uncompressed(id: FormatId, bpb: u32, aspect: ImageAspect) -> Self {
        Format {
            id,
            bpb,
            block_width: 1,
            block_height: 1,
            aspect,
        }
    }

    const fn compressed(id: FormatId, bpb: u32) -> Self {
        Format {
            id,
            bpb,
            block_width: 4,
            block_height: 4,
            aspect: ImageAspect::COLOR,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.block_width != 1 || self.block_height != 1
    }

    /// Bytes occupied by a `width` x `height` surface of this format, rounding partial blocks up.
    pub fn size_2d(&self, width: u32, height: u32) -> usize {
        width.div_ceil(self.block_width) as usize
            * height.div_ceil(self.block_height) as usize
            * self.bpb as usize
    }

    /// Bytes occupied by a single layer of `dimensions` in this format.
    pub fn size(&self, dimensions: Dimensions) -> usize {
        self.size_2d(dimensions.width, dimensions.height) * dimensions.depth as usize
    }
}

pub const R8_UNORM: Format = Format::uncompressed(FormatId::R8Unorm, 1, ImageAspect::COLOR);
pub const R8G8_UNORM: Format = Format::uncompressed(FormatId::R8G8Unorm, 2, ImageAspect::COLOR);
pub const R5G6B5_UNORM: Format = Format::uncompressed(FormatId::R5G6B5Unorm, 2, ImageAspect::COLOR);
pub const R8G8B8A8_UNORM: Format =
    Format::uncompressed(FormatId::R8G8B8A8Unorm, 4, ImageAspect::COLOR);
pub const B8G8R8A8_UNORM: Format =
    Format::uncompressed(FormatId::B8G8R8A8Unorm, 4, ImageAspect::COLOR);
pub const R16G16B16A16_FLOAT: Format =
    Format::uncompressed(FormatId::R16G16B16A16Float, 8, ImageAspect::COLOR);
pub const R32_FLOAT: Format = Format::uncompressed(FormatId::R32Float, 4, ImageAspect::COLOR);
pub const R32G32B32A32_FLOAT: Format =
    Format::uncompressed(FormatId::R32G32B32A32Float, 16, ImageAspect::COLOR);
pub const D32_FLOAT: Format = Format::uncompressed(FormatId::D32Float, 4, ImageAspect::DEPTH);
pub const D24_UNORM_S8_UINT: Format = Format::uncompressed(
    FormatId::D24UnormS8Uint,
    4,
    ImageAspect::DEPTH.union(ImageAspect::STENCIL),
);
pub const BC1_RGBA_UNORM: Format = Format::compressed(FormatId::Bc1RgbaUnorm, 8);
pub const BC3_UNORM: Format = Format::compressed(FormatId::Bc3Unorm, 16);

/// Dimensionality of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    D1,
    D2,
    D3,
}

/// Size of an image's base level in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Dimensions {
            width,
            height,
            depth,
        }
    }

    pub const fn new_2d(width: u32, height: u32) -> Self {
        Dimensions::new(width, height, 1)
    }

    pub fn image_type(&self) -> ImageType {
        if self.depth > 1 {
            ImageType::D3
        } else if self.height > 1 {
            ImageType::D2
        } else {
            ImageType::D1
        }
    }

    /// Dimensions of mip `level`, never smaller than one texel on any axis.
    pub fn mip(&self, level: u32) -> Dimensions {
        Dimensions {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
}
