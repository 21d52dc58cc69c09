// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Moving texels between guest memory and the host image.

Two paths exist in each direction.  When the image is linearly tiled and its memory is mapped
into the host, texels are decoded straight into (or encoded straight out of) that memory.
Otherwise they go through a staging buffer and a GPU copy, which also lets the image sit in a
device-optimal arrangement.
*/

use std::sync::Arc;

use super::writeback::GuestWriteback;
use super::{Texture, TextureState};
use crate::command::{
    Access, BufferImageCopy, CommandBuffer, ImageBarrier, ImageLayout, PipelineStage, SubresourceLayers,
};
use crate::copy;
use crate::error::Error;
use crate::fence::FenceCycle;
use crate::guest::{GuestMapping, GuestTexture};
use crate::memory::{HostMemory, ImageHandle, ImageTiling, StagingBuffer};

impl Texture {
    /// Uploads the guest contents into the image, in a submission of its own.
    pub fn synchronize_host(&self) -> Result<(), Error> {
        let (guest, mapping) = self.synchronizable_guest()?;
        let mut state = self.lock_settled(None, true)?;
        if let Some(memory) = self.direct_memory(&state) {
            decode_guest(guest, mapping, &memory);
            return Ok(());
        }
        let staging = self.stage_guest(guest, mapping)?;
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        let mut layout = state.layout;
        let cycle = self.gpu.submit_with_cycle(|commands, cycle| {
            layout = self.record_upload(image, state.layout, commands, &staging);
            cycle.attach(staging.clone());
            self.attach_to(cycle);
            Ok(())
        })?;
        state.layout = layout;
        state.cycle = Arc::downgrade(&cycle);
        Ok(())
    }

    /// Uploads the guest contents into the image as part of the caller's batch.
    ///
    /// `cycle` must be the cycle that will track `commands`.  A submission of this texture
    /// still in flight on another cycle is waited for first.
    pub fn synchronize_host_with_buffer(
        &self,
        commands: &mut CommandBuffer,
        cycle: &Arc<FenceCycle>,
    ) -> Result<(), Error> {
        let (guest, mapping) = self.synchronizable_guest()?;
        let mut state = self.lock_settled(Some(cycle), true)?;
        if let Some(memory) = self.direct_memory(&state) {
            decode_guest(guest, mapping, &memory);
            return Ok(());
        }
        let staging = self.stage_guest(guest, mapping)?;
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        let previous = state.layout;
        state.layout = self.record_upload(image, previous, commands, &staging);
        cycle.attach(staging);
        self.attach_to(cycle);
        self.track(&mut state, cycle, previous);
        Ok(())
    }

    /// Writes the image contents back into guest memory.
    ///
    /// With a mapped backing the write happens before returning.  Otherwise it happens once
    /// the GPU has copied the image out; [`Texture::wait_on_fence`] waits for that.  An image
    /// in the undefined layout has no contents, and nothing happens.
    pub fn synchronize_guest(&self) -> Result<(), Error> {
        let (guest, mapping) = self.synchronizable_guest()?;
        let mut state = self.lock_settled(None, true)?;
        if state.layout == ImageLayout::Undefined {
            return Ok(());
        }
        if let Some(memory) = self.direct_memory(&state) {
            GuestWriteback::from_mapped(guest.clone(), mapping, memory).run();
            return Ok(());
        }
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        let staging = self.gpu.allocator().allocate_staging_buffer(self.staging_size())?;
        let mut layout = state.layout;
        let cycle = self.gpu.submit_with_cycle(|commands, cycle| {
            layout = self.record_download(image, state.layout, commands, &staging);
            cycle.attach(staging.clone());
            self.attach_to(cycle);
            GuestWriteback::from_staging(guest.clone(), mapping, staging.clone()).schedule(cycle);
            Ok(())
        })?;
        state.layout = layout;
        state.cycle = Arc::downgrade(&cycle);
        Ok(())
    }

    /// Writes the image contents back into guest memory once the caller's batch completes.
    ///
    /// `cycle` must be the cycle that will track `commands`.
    pub fn synchronize_guest_with_buffer(
        &self,
        commands: &mut CommandBuffer,
        cycle: &Arc<FenceCycle>,
    ) -> Result<(), Error> {
        let (guest, mapping) = self.synchronizable_guest()?;
        let mut state = self.lock_settled(Some(cycle), true)?;
        if state.layout == ImageLayout::Undefined {
            return Ok(());
        }
        let previous = state.layout;
        if let Some(memory) = self.direct_memory(&state) {
            // The batch may still render into the image, so wait for it.
            GuestWriteback::from_mapped(guest.clone(), mapping, memory).schedule(cycle);
            self.attach_to(cycle);
            self.track(&mut state, cycle, previous);
            return Ok(());
        }
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        let staging = self.gpu.allocator().allocate_staging_buffer(self.staging_size())?;
        state.layout = self.record_download(image, previous, commands, &staging);
        cycle.attach(staging.clone());
        self.attach_to(cycle);
        GuestWriteback::from_staging(guest.clone(), mapping, staging).schedule(cycle);
        self.track(&mut state, cycle, previous);
        Ok(())
    }

    /// Records a copy of `staging` into the base level of every layer.
    ///
    /// `staging` holds the layers back to back, each packed linearly.
    pub fn copy_from_staging_buffer(&self, commands: &mut CommandBuffer, staging: &StagingBuffer) -> Result<(), Error> {
        let mut state = self.lock_with_backing()?;
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        state.layout = self.record_upload(image, state.layout, commands, staging);
        Ok(())
    }

    /// Records a copy of the base level of every layer into `staging`.
    pub fn copy_into_staging_buffer(&self, commands: &mut CommandBuffer, staging: &StagingBuffer) -> Result<(), Error> {
        let mut state = self.lock_with_backing()?;
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        state.layout = self.record_download(image, state.layout, commands, staging);
        Ok(())
    }

    /// Checks everything synchronization needs from the guest.
    fn synchronizable_guest(&self) -> Result<(&GuestTexture, GuestMapping), Error> {
        let guest = self.guest.as_ref().ok_or(Error::NoGuestTexture)?;
        if guest.dimensions != self.dimensions {
            return Err(Error::DimensionMismatch {
                guest: guest.dimensions,
                host: self.dimensions,
            });
        }
        if guest.layer_count != self.layer_count {
            return Err(Error::LayerCountMismatch {
                guest: guest.layer_count,
                host: self.layer_count,
            });
        }
        let mapping = guest.single_mapping()?;
        Ok((guest, mapping))
    }

    /// The host mapping to read and write texels through, when the image can be addressed
    /// directly.
    fn direct_memory(&self, state: &TextureState) -> Option<HostMemory> {
        match self.tiling {
            ImageTiling::Linear => state.backing.mapped_memory().cloned(),
            ImageTiling::Optimal => None,
        }
    }

    fn staging_size(&self) -> usize {
        self.format.size(self.dimensions) * self.layer_count as usize
    }

    /// Allocates a staging buffer and decodes the guest contents into it.
    fn stage_guest(&self, guest: &GuestTexture, mapping: GuestMapping) -> Result<Arc<StagingBuffer>, Error> {
        let staging = self.gpu.allocator().allocate_staging_buffer(self.staging_size())?;
        decode_guest(guest, mapping, staging.memory());
        Ok(staging)
    }

    fn staging_region(&self) -> BufferImageCopy {
        BufferImageCopy {
            buffer_offset: 0,
            subresource: SubresourceLayers {
                aspect: self.format.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: self.layer_count,
            },
            extent: self.dimensions,
        }
    }

    /// Records the upload from `layout` and returns the layout the image ends up in.
    fn record_upload(
        &self,
        image: ImageHandle,
        layout: ImageLayout,
        commands: &mut CommandBuffer,
        staging: &StagingBuffer,
    ) -> ImageLayout {
        let range = self.whole_range();
        let transfer = ImageLayout::TransferDstOptimal;
        if layout != transfer {
            commands.pipeline_barrier(ImageBarrier {
                image,
                src_stage: PipelineStage::TOP_OF_PIPE,
                dst_stage: PipelineStage::TRANSFER,
                src_access: Access::empty(),
                dst_access: Access::TRANSFER_WRITE,
                old_layout: layout,
                new_layout: transfer,
                range,
            });
        }
        commands.copy_buffer_to_image(staging.handle(), image, transfer, self.staging_region());
        match layout {
            ImageLayout::Undefined => transfer,
            ImageLayout::TransferDstOptimal => layout,
            layout => {
                commands.pipeline_barrier(ImageBarrier {
                    image,
                    src_stage: PipelineStage::TRANSFER,
                    dst_stage: PipelineStage::BOTTOM_OF_PIPE,
                    src_access: Access::TRANSFER_WRITE,
                    dst_access: Access::MEMORY_READ | Access::MEMORY_WRITE,
                    old_layout: transfer,
                    new_layout: layout,
                    range,
                });
                layout
            }
        }
    }

    fn record_download(
        &self,
        image: ImageHandle,
        layout: ImageLayout,
        commands: &mut CommandBuffer,
        staging: &StagingBuffer,
    ) -> ImageLayout {
        let range = self.whole_range();
        let transfer = ImageLayout::TransferSrcOptimal;
        if layout != transfer {
            commands.pipeline_barrier(ImageBarrier {
                image,
                src_stage: PipelineStage::TOP_OF_PIPE,
                dst_stage: PipelineStage::TRANSFER,
                src_access: Access::MEMORY_WRITE,
                dst_access: Access::TRANSFER_READ,
                old_layout: layout,
                new_layout: transfer,
                range,
            });
        }
        commands.copy_image_to_buffer(image, transfer, staging.handle(), self.staging_region());
        match layout {
            ImageLayout::Undefined => transfer,
            ImageLayout::TransferSrcOptimal => layout,
            layout => {
                commands.pipeline_barrier(ImageBarrier {
                    image,
                    src_stage: PipelineStage::TRANSFER,
                    dst_stage: PipelineStage::BOTTOM_OF_PIPE,
                    src_access: Access::TRANSFER_READ,
                    dst_access: Access::MEMORY_READ | Access::MEMORY_WRITE,
                    old_layout: transfer,
                    new_layout: layout,
                    range,
                });
                layout
            }
        }
    }
}

/// Untiles the guest surface into `memory`.
fn decode_guest(guest: &GuestTexture, mapping: GuestMapping, memory: &HostMemory) {
    // SAFETY: the mapping was validated against the surface size and the guest is not
    // writing texture memory while the host synchronizes it.
    let guest_bytes = unsafe { mapping.as_slice() };
    memory.write(|linear| copy::copy_guest_to_linear(guest, guest_bytes, linear));
}
