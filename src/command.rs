// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Backend-neutral command recording.

Texture operations never talk to a device directly.  They record [`Command`]s into a
[`CommandBuffer`] handed to them by a [`crate::scheduler::Scheduler`], which turns the buffer into
real device work and reports completion through a [`crate::fence::FenceCycle`].
*/

use crate::format::{Dimensions, ImageAspect};
use crate::memory::{BufferHandle, ImageHandle};

/// The access pattern an image is currently arranged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents are meaningless and may be discarded.
    Undefined,
    /// Contents were written by the host before any device use.
    Preinitialized,
    General,
    ColorAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    PresentSrc,
}

bitflags::bitflags! {
    /// Pipeline stages a barrier synchronizes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStage: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const TRANSFER = 1 << 1;
        const BOTTOM_OF_PIPE = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Memory accesses a barrier makes available or visible.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const TRANSFER_READ = 1 << 0;
        const TRANSFER_WRITE = 1 << 1;
        const MEMORY_READ = 1 << 2;
        const MEMORY_WRITE = 1 << 3;
    }
}

/// Mip levels to the end of the chain.
pub const REMAINING_MIP_LEVELS: u32 = u32::MAX;
/// Array layers to the end of the image.
pub const REMAINING_ARRAY_LAYERS: u32 = u32::MAX;

/// A set of mip levels and array layers of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub aspect: ImageAspect,
    pub base_mip_level: u32,
    /// [`REMAINING_MIP_LEVELS`] selects every level from `base_mip_level` on.
    pub level_count: u32,
    pub base_array_layer: u32,
    /// [`REMAINING_ARRAY_LAYERS`] selects every layer from `base_array_layer` on.
    pub layer_count: u32,
}

impl SubresourceRange {
    /// Every level and layer of an image.
    pub const fn whole(aspect: ImageAspect) -> Self {
        SubresourceRange {
            aspect,
            base_mip_level: 0,
            level_count: REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: REMAINING_ARRAY_LAYERS,
        }
    }

    /// Replaces the `REMAINING_*` sentinels with concrete counts for an image with
    /// `mip_levels` levels and `array_layers` layers.
    pub fn resolve(&self, mip_levels: u32, array_layers: u32) -> SubresourceRange {
        SubresourceRange {
            level_count: if self.level_count == REMAINING_MIP_LEVELS {
                mip_levels.saturating_sub(self.base_mip_level)
            } else {
                self.level_count
            },
            layer_count: if self.layer_count == REMAINING_ARRAY_LAYERS {
                array_layers.saturating_sub(self.base_array_layer)
            } else {
                self.layer_count
            },
            ..*self
        }
    }
}

/// The layers of a single mip level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceLayers {
    pub aspect: ImageAspect,
    pub mip_level: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

/// Transitions `image` between layouts and orders memory accesses around the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub src_stage: PipelineStage,
    pub dst_stage: PipelineStage,
    pub src_access: Access,
    pub dst_access: Access,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub range: SubresourceRange,
}

/// A copy between a tightly packed buffer region and one mip level of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    pub buffer_offset: usize,
    pub subresource: SubresourceLayers,
    pub extent: Dimensions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCopy {
    pub src_subresource: SubresourceLayers,
    pub dst_subresource: SubresourceLayers,
    pub extent: Dimensions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PipelineBarrier(ImageBarrier),
    CopyBufferToImage {
        buffer: BufferHandle,
        image: ImageHandle,
        layout: ImageLayout,
        region: BufferImageCopy,
    },
    CopyImageToBuffer {
        image: ImageHandle,
        layout: ImageLayout,
        buffer: BufferHandle,
        region: BufferImageCopy,
    },
    CopyImage {
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        region: ImageCopy,
    },
}

/// Commands recorded for a single submission, in execution order.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline_barrier(&mut self, barrier: ImageBarrier) {
        self.commands.push(Command::PipelineBarrier(barrier));
    }

    pub fn copy_buffer_to_image(
        &mut self,
        buffer: BufferHandle,
        image: ImageHandle,
        layout: ImageLayout,
        region: BufferImageCopy,
    ) {
        self.commands.push(Command::CopyBufferToImage {
            buffer,
            image,
            layout,
            region,
        });
    }

    pub fn copy_image_to_buffer(
        &mut self,
        image: ImageHandle,
        layout: ImageLayout,
        buffer: BufferHandle,
        region: BufferImageCopy,
    ) {
        self.commands.push(Command::CopyImageToBuffer {
            image,
            layout,
            buffer,
            region,
        });
    }

    pub fn copy_image(
        &mut self,
        src: ImageHandle,
        src_layout: ImageLayout,
        dst: ImageHandle,
        dst_layout: ImageLayout,
        region: ImageCopy,
    ) {
        self.commands.push(Command::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            region,
        });
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_resolve_to_the_end() {
        let range = SubresourceRange {
            aspect: ImageAspect::COLOR,
            base_mip_level: 1,
            level_count: REMAINING_MIP_LEVELS,
            base_array_layer: 2,
            layer_count: REMAINING_ARRAY_LAYERS,
        };
        let resolved = range.resolve(4, 6);
        assert_eq!(resolved.level_count, 3);
        assert_eq!(resolved.layer_count, 4);
        assert_eq!(resolved.base_mip_level, 1);

        let explicit = SubresourceRange {
            level_count: 1,
            layer_count: 1,
            ..range
        };
        assert_eq!(explicit.resolve(4, 6), explicit);
    }
}
