// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Object tables and command execution for the software device.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::command::{BufferImageCopy, Command, ImageBarrier, ImageCopy, ImageLayout, SubresourceLayers};
use crate::error::Error;
use crate::memory::{
    Allocator, BufferHandle, DeviceImage, HostMemory, ImageCreateInfo, ImageHandle, MappedImage, StagingBuffer,
    ViewHandle,
};
use crate::texture::ViewDescriptor;

/// One mip level of one array layer.
#[derive(Debug, Clone, Copy)]
struct Subresource {
    offset: usize,
    size: usize,
    layout: ImageLayout,
}

struct SoftImage {
    info: ImageCreateInfo,
    memory: HostMemory,
    /// Mip-major, then layer.
    subresources: Vec<Subresource>,
}

impl SoftImage {
    fn new(info: ImageCreateInfo) -> Self {
        let mut subresources = Vec::with_capacity((info.mip_levels * info.array_layers) as usize);
        let mut offset = 0;
        for level in 0..info.mip_levels {
            let size = info.format.size(info.extent.mip(level));
            for _ in 0..info.array_layers {
                subresources.push(Subresource {
                    offset,
                    size,
                    layout: info.initial_layout,
                });
                offset += size;
            }
        }
        SoftImage {
            memory: HostMemory::new(offset),
            info,
            subresources,
        }
    }

    fn index(&self, level: u32, layer: u32) -> Option<usize> {
        (level < self.info.mip_levels && layer < self.info.array_layers)
            .then(|| (level * self.info.array_layers + layer) as usize)
    }

    fn subresource(&self, level: u32, layer: u32) -> Option<Subresource> {
        self.index(level, layer).map(|index| self.subresources[index])
    }
}

#[derive(Default)]
struct Tables {
    next_handle: u64,
    images: HashMap<ImageHandle, SoftImage>,
    buffers: HashMap<BufferHandle, HostMemory>,
    views: HashMap<ViewHandle, ViewDescriptor>,
    validation_errors: Vec<String>,
}

impl Tables {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn report(&mut self, message: String) {
        logwise::warn_sync!(
            "Soft GPU validation: {message}",
            message = logwise::privacy::LogIt(&message)
        );
        self.validation_errors.push(message);
    }
}

/// The memory side of the software GPU.
pub(crate) struct Device {
    this: Weak<Device>,
    tables: wasm_safe_mutex::Mutex<Tables>,
}

impl Device {
    pub(crate) fn new() -> Arc<Device> {
        Arc::new_cyclic(|this| Device {
            this: this.clone(),
            tables: wasm_safe_mutex::Mutex::new(Tables::default()),
        })
    }

    pub(crate) fn validation_errors(&self) -> Vec<String> {
        self.tables.lock_sync().validation_errors.clone()
    }

    pub(crate) fn image_count(&self) -> usize {
        self.tables.lock_sync().images.len()
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.tables.lock_sync().buffers.len()
    }

    pub(crate) fn view_count(&self) -> usize {
        self.tables.lock_sync().views.len()
    }

    pub(crate) fn image_layout(&self, image: ImageHandle, level: u32, layer: u32) -> Option<ImageLayout> {
        let tables = self.tables.lock_sync();
        tables.images.get(&image)?.subresource(level, layer).map(|s| s.layout)
    }

    pub(crate) fn image_contents(&self, image: ImageHandle, level: u32, layer: u32) -> Option<Vec<u8>> {
        let tables = self.tables.lock_sync();
        let image = tables.images.get(&image)?;
        let subresource = image.subresource(level, layer)?;
        Some(image.memory.read(|bytes| {
            bytes[subresource.offset..subresource.offset + subresource.size].to_vec()
        }))
    }

    fn allocate(&self, info: &ImageCreateInfo) -> Result<(ImageHandle, HostMemory), Error> {
        let extent = info.extent;
        if extent.width == 0 || extent.height == 0 || extent.depth == 0 {
            return Err(Error::Device(format!("zero-sized image {extent:?}")));
        }
        if info.mip_levels == 0 || info.array_layers == 0 {
            return Err(Error::Device(String::from(
                "images need at least one mip level and one layer",
            )));
        }
        let image = SoftImage::new(info.clone());
        let memory = image.memory.clone();
        let mut tables = self.tables.lock_sync();
        let handle = ImageHandle::new(tables.next_handle());
        tables.images.insert(handle, image);
        Ok((handle, memory))
    }

    fn device_image(&self, handle: ImageHandle, info: &ImageCreateInfo) -> DeviceImage {
        let device = self.this.clone();
        DeviceImage::with_release(handle, info.clone(), move |handle| {
            if let Some(device) = device.upgrade() {
                let mut tables = device.tables.lock_sync();
                tables.images.remove(&handle);
                tables.views.retain(|_, descriptor| descriptor.image != handle);
            }
        })
    }

    /// Runs one submission's commands in order.
    pub(crate) fn execute(&self, commands: Vec<Command>) {
        let mut tables = self.tables.lock_sync();
        for command in commands {
            if let Err(message) = execute_command(&mut tables, &command) {
                tables.report(message);
            }
        }
    }
}

impl Allocator for Device {
    fn allocate_staging_buffer(&self, size: usize) -> Result<Arc<StagingBuffer>, Error> {
        let memory = HostMemory::new(size);
        let handle = {
            let mut tables = self.tables.lock_sync();
            let handle = BufferHandle::new(tables.next_handle());
            tables.buffers.insert(handle, memory.clone());
            handle
        };
        let device = self.this.clone();
        Ok(Arc::new(StagingBuffer::with_release(handle, memory, move |handle| {
            if let Some(device) = device.upgrade() {
                device.tables.lock_sync().buffers.remove(&handle);
            }
        })))
    }

    fn allocate_image(&self, info: &ImageCreateInfo) -> Result<DeviceImage, Error> {
        let (handle, _memory) = self.allocate(info)?;
        Ok(self.device_image(handle, info))
    }

    fn allocate_mapped_image(&self, info: &ImageCreateInfo) -> Result<MappedImage, Error> {
        let (handle, memory) = self.allocate(info)?;
        Ok(MappedImage::new(self.device_image(handle, info), memory))
    }

    fn create_view(&self, descriptor: &ViewDescriptor) -> Result<ViewHandle, Error> {
        let mut tables = self.tables.lock_sync();
        if !tables.images.contains_key(&descriptor.image) {
            return Err(Error::Device(format!(
                "view of unknown image {:?}",
                descriptor.image
            )));
        }
        let handle = ViewHandle::new(tables.next_handle());
        tables.views.insert(handle, *descriptor);
        Ok(handle)
    }
}

fn execute_command(tables: &mut Tables, command: &Command) -> Result<(), String> {
    match command {
        Command::PipelineBarrier(barrier) => pipeline_barrier(tables, barrier),
        Command::CopyBufferToImage {
            buffer,
            image,
            layout,
            region,
        } => {
            let buffer = tables
                .buffers
                .get(buffer)
                .ok_or_else(|| format!("copy from unknown buffer {buffer:?}"))?;
            let image = tables
                .images
                .get(image)
                .ok_or_else(|| format!("copy into unknown image {image:?}"))?;
            check_copy_layout(image, &region.subresource, *layout, ImageLayout::TransferDstOptimal)?;
            let spans = buffer_spans(image, region)?;
            let staged = buffer.to_vec();
            image.memory.write(|bytes| -> Result<(), String> {
                for (buffer_offset, subresource) in spans {
                    let source = staged
                        .get(buffer_offset..buffer_offset + subresource.size)
                        .ok_or_else(|| String::from("copy reads past the end of the buffer"))?;
                    bytes[subresource.offset..subresource.offset + subresource.size].copy_from_slice(source);
                }
                Ok(())
            })
        }
        Command::CopyImageToBuffer {
            image,
            layout,
            buffer,
            region,
        } => {
            let buffer = tables
                .buffers
                .get(buffer)
                .ok_or_else(|| format!("copy into unknown buffer {buffer:?}"))?;
            let image = tables
                .images
                .get(image)
                .ok_or_else(|| format!("copy from unknown image {image:?}"))?;
            check_copy_layout(image, &region.subresource, *layout, ImageLayout::TransferSrcOptimal)?;
            let spans = buffer_spans(image, region)?;
            let texels = image.memory.to_vec();
            buffer.write(|bytes| -> Result<(), String> {
                for (buffer_offset, subresource) in spans {
                    let destination = bytes
                        .get_mut(buffer_offset..buffer_offset + subresource.size)
                        .ok_or_else(|| String::from("copy writes past the end of the buffer"))?;
                    destination.copy_from_slice(&texels[subresource.offset..subresource.offset + subresource.size]);
                }
                Ok(())
            })
        }
        Command::CopyImage {
            src,
            src_layout,
            dst,
            dst_layout,
            region,
        } => copy_image(tables, *src, *src_layout, *dst, *dst_layout, region),
    }
}

fn pipeline_barrier(tables: &mut Tables, barrier: &ImageBarrier) -> Result<(), String> {
    let image = tables
        .images
        .get_mut(&barrier.image)
        .ok_or_else(|| format!("barrier on unknown image {:?}", barrier.image))?;
    let range = barrier
        .range
        .resolve(image.info.mip_levels, image.info.array_layers);
    let mut mismatches = Vec::new();
    for level in range.base_mip_level..range.base_mip_level + range.level_count {
        for layer in range.base_array_layer..range.base_array_layer + range.layer_count {
            let index = image
                .index(level, layer)
                .ok_or_else(|| format!("barrier range {range:?} exceeds image {:?}", barrier.image))?;
            let subresource = &mut image.subresources[index];
            // Transitions out of Undefined discard the contents and are always legal.
            if barrier.old_layout != ImageLayout::Undefined && subresource.layout != barrier.old_layout {
                mismatches.push(format!(
                    "barrier on {:?} level {level} layer {layer} expects {:?} but the image is in {:?}",
                    barrier.image, barrier.old_layout, subresource.layout
                ));
            }
            subresource.layout = barrier.new_layout;
        }
    }
    match mismatches.len() {
        0 => Ok(()),
        _ => Err(mismatches.join("; ")),
    }
}

fn check_copy_layout(
    image: &SoftImage,
    subresource: &SubresourceLayers,
    layout: ImageLayout,
    transfer: ImageLayout,
) -> Result<(), String> {
    if layout != transfer && layout != ImageLayout::General {
        return Err(format!("copy uses {layout:?}, expected {transfer:?} or General"));
    }
    for layer in subresource.base_array_layer..subresource.base_array_layer + subresource.layer_count {
        let actual = image
            .subresource(subresource.mip_level, layer)
            .ok_or_else(|| format!("copy subresource {subresource:?} exceeds the image"))?
            .layout;
        if actual != layout {
            return Err(format!(
                "copy names {layout:?} but level {} layer {layer} is in {actual:?}",
                subresource.mip_level
            ));
        }
    }
    Ok(())
}

/// Pairs each copied layer with where it sits in the buffer.
fn buffer_spans(image: &SoftImage, region: &BufferImageCopy) -> Result<Vec<(usize, Subresource)>, String> {
    let level = region.subresource.mip_level;
    if region.extent != image.info.extent.mip(level) {
        return Err(format!(
            "partial copy of {:?} out of level {level} is not supported",
            region.extent
        ));
    }
    let mut spans = Vec::with_capacity(region.subresource.layer_count as usize);
    let mut buffer_offset = region.buffer_offset;
    for layer in region.subresource.base_array_layer..region.subresource.base_array_layer + region.subresource.layer_count {
        let subresource = image
            .subresource(level, layer)
            .ok_or_else(|| format!("level {level} layer {layer} is outside the image"))?;
        spans.push((buffer_offset, subresource));
        buffer_offset += subresource.size;
    }
    Ok(spans)
}

fn copy_image(
    tables: &mut Tables,
    src: ImageHandle,
    src_layout: ImageLayout,
    dst: ImageHandle,
    dst_layout: ImageLayout,
    region: &ImageCopy,
) -> Result<(), String> {
    let source = tables
        .images
        .get(&src)
        .ok_or_else(|| format!("copy from unknown image {src:?}"))?;
    let destination = tables
        .images
        .get(&dst)
        .ok_or_else(|| format!("copy into unknown image {dst:?}"))?;
    check_copy_layout(source, &region.src_subresource, src_layout, ImageLayout::TransferSrcOptimal)?;
    check_copy_layout(destination, &region.dst_subresource, dst_layout, ImageLayout::TransferDstOptimal)?;
    if region.src_subresource.layer_count != region.dst_subresource.layer_count {
        return Err(String::from("image copy layer counts differ"));
    }
    let texels = source.memory.to_vec();
    let mut copies = Vec::with_capacity(region.src_subresource.layer_count as usize);
    for i in 0..region.src_subresource.layer_count {
        let from = source
            .subresource(region.src_subresource.mip_level, region.src_subresource.base_array_layer + i)
            .ok_or_else(|| String::from("image copy source is outside the image"))?;
        let to = destination
            .subresource(region.dst_subresource.mip_level, region.dst_subresource.base_array_layer + i)
            .ok_or_else(|| String::from("image copy destination is outside the image"))?;
        if from.size != to.size {
            return Err(format!("image copy moves {} bytes into {}", from.size, to.size));
        }
        copies.push((from, to));
    }
    destination.memory.write(|bytes| {
        for (from, to) in copies {
            bytes[to.offset..to.offset + to.size].copy_from_slice(&texels[from.offset..from.offset + from.size]);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Access, PipelineStage, SubresourceRange};
    use crate::format::{self, Dimensions, ImageType};
    use crate::memory::{ImageTiling, ImageUsage, SampleCount};

    fn info(layers: u32) -> ImageCreateInfo {
        ImageCreateInfo {
            image_type: ImageType::D2,
            format: format::R8_UNORM,
            extent: Dimensions::new_2d(4, 4),
            mip_levels: 2,
            array_layers: layers,
            samples: SampleCount::S1,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::TRANSFER_DST,
            initial_layout: ImageLayout::Undefined,
        }
    }

    fn barrier(image: ImageHandle, old_layout: ImageLayout, new_layout: ImageLayout) -> Command {
        Command::PipelineBarrier(ImageBarrier {
            image,
            src_stage: PipelineStage::TOP_OF_PIPE,
            dst_stage: PipelineStage::TRANSFER,
            src_access: Access::empty(),
            dst_access: Access::TRANSFER_WRITE,
            old_layout,
            new_layout,
            range: SubresourceRange::whole(format::R8_UNORM.aspect),
        })
    }

    #[test]
    fn subresources_are_mip_major() {
        let image = SoftImage::new(info(2));
        assert_eq!(image.memory.len(), 2 * 16 + 2 * 4);
        assert_eq!(image.subresource(0, 1).unwrap().offset, 16);
        assert_eq!(image.subresource(1, 0).unwrap().offset, 32);
        assert_eq!(image.subresource(1, 1).unwrap().size, 4);
        assert!(image.subresource(2, 0).is_none());
    }

    #[test]
    fn stale_barriers_are_reported() {
        let device = Device::new();
        let image = device.allocate_image(&info(1)).unwrap();
        device.execute(vec![barrier(image.handle(), ImageLayout::Undefined, ImageLayout::General)]);
        assert!(device.validation_errors().is_empty());
        assert_eq!(device.image_layout(image.handle(), 1, 0), Some(ImageLayout::General));

        device.execute(vec![barrier(
            image.handle(),
            ImageLayout::TransferSrcOptimal,
            ImageLayout::General,
        )]);
        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn buffer_to_image_requires_transfer_layout() {
        let device = Device::new();
        let image = device.allocate_image(&info(1)).unwrap();
        let staging = device.allocate_staging_buffer(16).unwrap();
        staging.memory().write(|bytes| bytes.fill(3));
        let copy = Command::CopyBufferToImage {
            buffer: staging.handle(),
            image: image.handle(),
            layout: ImageLayout::TransferDstOptimal,
            region: BufferImageCopy {
                buffer_offset: 0,
                subresource: SubresourceLayers {
                    aspect: format::R8_UNORM.aspect,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                extent: Dimensions::new_2d(4, 4),
            },
        };
        device.execute(vec![copy.clone()]);
        assert_eq!(device.validation_errors().len(), 1);

        device.execute(vec![
            barrier(image.handle(), ImageLayout::Undefined, ImageLayout::TransferDstOptimal),
            copy,
        ]);
        assert_eq!(device.validation_errors().len(), 1);
        assert_eq!(device.image_contents(image.handle(), 0, 0), Some(vec![3u8; 16]));
    }

    #[test]
    fn released_objects_leave_the_tables() {
        let device = Device::new();
        let image = device.allocate_image(&info(1)).unwrap();
        let staging = device.allocate_staging_buffer(8).unwrap();
        assert_eq!((device.image_count(), device.buffer_count()), (1, 1));
        drop(image);
        drop(staging);
        assert_eq!((device.image_count(), device.buffer_count()), (0, 0));
    }
}
