// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Builder pattern for freeform texture creation.

use crate::command::ImageLayout;
use crate::format::{Dimensions, Format};
use crate::memory::{ImageTiling, ImageUsage, SampleCount};

/// Configuration for [`super::Texture::freeform`].
///
/// Defaults to a single-level, single-layer, single-sample, optimally tiled image that can be
/// sampled and starts out undefined.  The texture always adds transfer usage on top of
/// whatever is requested here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBuilder {
    dimensions: Dimensions,
    format: Format,
    usage: ImageUsage,
    tiling: ImageTiling,
    mip_levels: u32,
    layer_count: u32,
    samples: SampleCount,
    initial_layout: ImageLayout,
}

impl TextureBuilder {
    /// Create a new texture builder with required parameters.
    pub fn new(dimensions: Dimensions, format: Format) -> Self {
        Self {
            dimensions,
            format,
            usage: ImageUsage::SAMPLED,
            tiling: ImageTiling::Optimal,
            mip_levels: 1,
            layer_count: 1,
            samples: SampleCount::S1,
            initial_layout: ImageLayout::Undefined,
        }
    }

    pub fn with_usage(mut self, usage: ImageUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_tiling(mut self, tiling: ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_layer_count(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }

    pub fn with_samples(mut self, samples: SampleCount) -> Self {
        self.samples = samples;
        self
    }

    /// The layout the texture should be in once created.
    pub fn with_initial_layout(mut self, initial_layout: ImageLayout) -> Self {
        self.initial_layout = initial_layout;
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    pub fn tiling(&self) -> ImageTiling {
        self.tiling
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn samples(&self) -> SampleCount {
        self.samples
    }

    pub fn initial_layout(&self) -> ImageLayout {
        self.initial_layout
    }
}
