// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Layout tracking, barrier elision, cross-texture copies and the view cache.
#![cfg(feature = "backend_soft")]

use std::sync::Arc;

use guest_textures::command::{
    Access, BufferImageCopy, Command, CommandBuffer, ImageBarrier, ImageLayout, PipelineStage, SubresourceLayers,
    SubresourceRange, REMAINING_ARRAY_LAYERS, REMAINING_MIP_LEVELS,
};
use guest_textures::memory::ImageHandle;
use guest_textures::format::{self, Dimensions, ImageAspect};
use guest_textures::guest::{GuestMapping, GuestTexture, TileConfig};
use guest_textures::memory::Backing;
use guest_textures::soft::SoftGpu;
use guest_textures::texture::{
    ComponentMapping, ComponentSwizzle, ImageViewType, Texture, TextureBuilder, TextureInfo, TextureView,
};
use guest_textures::Error;

fn freeform(soft: &SoftGpu, dimensions: Dimensions, layout: ImageLayout) -> Arc<Texture> {
    Texture::freeform(
        soft.gpu(),
        TextureBuilder::new(dimensions, format::R8G8B8A8_UNORM).with_initial_layout(layout),
    )
    .unwrap()
}

fn staging_copies(commands: &CommandBuffer) -> (usize, usize) {
    let barriers = commands
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::PipelineBarrier(_)))
        .count();
    (barriers, commands.len() - barriers)
}

#[test]
fn transition_to_current_layout_submits_nothing() {
    let soft = SoftGpu::new().unwrap();
    let texture = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::General);
    assert_eq!(soft.submission_count(), 1);

    texture.transition_layout(ImageLayout::General).unwrap();
    assert_eq!(soft.submission_count(), 1);

    texture.transition_layout(ImageLayout::ShaderReadOnlyOptimal).unwrap();
    assert_eq!(soft.submission_count(), 2);
    texture.wait_on_fence().unwrap();
    let image = texture.backing().unwrap().unwrap();
    assert_eq!(soft.image_layout(image, 0, 0), Some(ImageLayout::ShaderReadOnlyOptimal));
    assert!(soft.validation_errors().is_empty());
}

#[test]
fn freeform_skips_transition_to_allocation_layout() {
    let soft = SoftGpu::new().unwrap();
    let undefined = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::Undefined);
    let preinitialized = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::Preinitialized);
    assert_eq!(soft.submission_count(), 0);
    assert_eq!(undefined.layout().unwrap(), ImageLayout::Undefined);
    assert_eq!(preinitialized.layout().unwrap(), ImageLayout::Preinitialized);
}

#[test]
fn staging_upload_elides_redundant_barriers() {
    let soft = SoftGpu::new().unwrap();
    let gpu = soft.gpu();
    let dimensions = Dimensions::new_2d(8, 8);
    let staging = gpu
        .allocator()
        .allocate_staging_buffer(format::R8G8B8A8_UNORM.size(dimensions))
        .unwrap();

    // already in the transfer layout: just the copy
    let texture = freeform(&soft, dimensions, ImageLayout::TransferDstOptimal);
    let mut commands = CommandBuffer::new();
    texture.copy_from_staging_buffer(&mut commands, &staging).unwrap();
    assert_eq!(staging_copies(&commands), (0, 1));
    assert_eq!(texture.layout().unwrap(), ImageLayout::TransferDstOptimal);

    // undefined: into the transfer layout and stay there
    let texture = freeform(&soft, dimensions, ImageLayout::Undefined);
    let mut commands = CommandBuffer::new();
    texture.copy_from_staging_buffer(&mut commands, &staging).unwrap();
    assert_eq!(staging_copies(&commands), (1, 1));
    assert_eq!(texture.layout().unwrap(), ImageLayout::TransferDstOptimal);

    // anything else: there and back
    let texture = freeform(&soft, dimensions, ImageLayout::General);
    texture.wait_on_fence().unwrap();
    let mut commands = CommandBuffer::new();
    texture.copy_from_staging_buffer(&mut commands, &staging).unwrap();
    assert_eq!(staging_copies(&commands), (2, 1));
    assert_eq!(texture.layout().unwrap(), ImageLayout::General);
    match &commands.commands()[2] {
        Command::PipelineBarrier(barrier) => {
            assert_eq!(barrier.old_layout, ImageLayout::TransferDstOptimal);
            assert_eq!(barrier.new_layout, ImageLayout::General);
        }
        other => panic!("expected a barrier, got {other:?}"),
    }
}

#[test]
fn staging_download_elides_redundant_barriers() {
    let soft = SoftGpu::new().unwrap();
    let gpu = soft.gpu();
    let dimensions = Dimensions::new_2d(8, 8);
    let staging = gpu
        .allocator()
        .allocate_staging_buffer(format::R8G8B8A8_UNORM.size(dimensions))
        .unwrap();

    let texture = freeform(&soft, dimensions, ImageLayout::TransferSrcOptimal);
    let mut commands = CommandBuffer::new();
    texture.copy_into_staging_buffer(&mut commands, &staging).unwrap();
    assert_eq!(staging_copies(&commands), (0, 1));

    let texture = freeform(&soft, dimensions, ImageLayout::ColorAttachmentOptimal);
    let mut commands = CommandBuffer::new();
    texture.copy_into_staging_buffer(&mut commands, &staging).unwrap();
    assert_eq!(staging_copies(&commands), (2, 1));
    assert_eq!(texture.layout().unwrap(), ImageLayout::ColorAttachmentOptimal);
}

#[test]
fn synchronize_guest_ignores_undefined_contents() {
    let soft = SoftGpu::new().unwrap();
    let dimensions = Dimensions::new_2d(4, 4);
    let memory = GuestMapping::from_static(Box::leak(vec![9u8; 64].into_boxed_slice()));
    let guest = GuestTexture::new(dimensions, format::R8G8B8A8_UNORM, TileConfig::Linear, vec![memory]);
    let texture = Texture::new(
        soft.gpu(),
        Backing::None,
        guest,
        TextureInfo::new(dimensions, format::R8G8B8A8_UNORM),
    )
    .unwrap();
    let image = soft
        .gpu()
        .allocator()
        .allocate_image(&guest_textures::memory::ImageCreateInfo {
            image_type: dimensions.image_type(),
            format: format::R8G8B8A8_UNORM,
            extent: dimensions,
            mip_levels: 1,
            array_layers: 1,
            samples: Default::default(),
            tiling: guest_textures::memory::ImageTiling::Optimal,
            usage: guest_textures::memory::ImageUsage::TRANSFER_DST | guest_textures::memory::ImageUsage::TRANSFER_SRC,
            initial_layout: ImageLayout::Undefined,
        })
        .unwrap();
    texture.swap_backing(image.into(), ImageLayout::Undefined).unwrap();

    texture.synchronize_guest().unwrap();
    assert_eq!(soft.submission_count(), 0);
    // SAFETY: the test owns the leaked memory
    assert_eq!(unsafe { memory.as_slice() }, &[9u8; 64][..]);
}

#[test]
fn copy_from_rejects_mismatches_without_submitting() {
    let soft = SoftGpu::new().unwrap();
    let source = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::General);
    let smaller = freeform(&soft, Dimensions::new_2d(4, 4), ImageLayout::General);
    let other_format = Texture::freeform(
        soft.gpu(),
        TextureBuilder::new(Dimensions::new_2d(8, 8), format::B8G8R8A8_UNORM).with_initial_layout(ImageLayout::General),
    )
    .unwrap();
    let undefined = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::Undefined);
    let submitted = soft.submission_count();
    let range = SubresourceRange::whole(ImageAspect::COLOR);

    assert!(matches!(smaller.copy_from(&source, range), Err(Error::CopyDimensionMismatch)));
    assert!(matches!(other_format.copy_from(&source, range), Err(Error::CopyFormatMismatch)));
    assert!(matches!(source.copy_from(&undefined, range), Err(Error::CopyFromUndefined)));
    assert!(matches!(source.copy_from(&source, range), Err(Error::CopySelf)));
    assert_eq!(soft.submission_count(), submitted);
}

#[test]
fn copy_from_copies_guest_contents() {
    let soft = SoftGpu::new().unwrap();
    let dimensions = Dimensions::new_2d(16, 16);
    let memory = GuestMapping::from_static(Box::leak((0..=255u8).cycle().take(1024).collect::<Vec<_>>().into_boxed_slice()));
    let guest = GuestTexture::new(dimensions, format::R8G8B8A8_UNORM, TileConfig::Block { block_height: 2 }, vec![memory]);
    let source = Texture::from_guest(soft.gpu(), guest).unwrap();
    source.synchronize_host().unwrap();

    let destination = freeform(&soft, dimensions, ImageLayout::Undefined);
    destination.copy_from(&source, SubresourceRange::whole(ImageAspect::COLOR)).unwrap();
    assert_eq!(destination.layout().unwrap(), ImageLayout::TransferDstOptimal);
    assert_eq!(source.layout().unwrap(), ImageLayout::General);
    destination.wait_on_fence().unwrap();

    let src_image = source.backing().unwrap().unwrap();
    let dst_image = destination.backing().unwrap().unwrap();
    assert_eq!(soft.image_contents(dst_image, 0, 0), soft.image_contents(src_image, 0, 0));
    assert_eq!(soft.image_layout(src_image, 0, 0), Some(ImageLayout::General));

    // copying back the other way restores the destination's layout too
    let back = freeform(&soft, dimensions, ImageLayout::ShaderReadOnlyOptimal);
    back.copy_from(&destination, SubresourceRange::whole(ImageAspect::COLOR)).unwrap();
    back.wait_on_fence().unwrap();
    let back_image = back.backing().unwrap().unwrap();
    assert_eq!(soft.image_layout(back_image, 0, 0), Some(ImageLayout::ShaderReadOnlyOptimal));
    assert_eq!(soft.image_contents(back_image, 0, 0), soft.image_contents(src_image, 0, 0));
    assert!(soft.validation_errors().is_empty());
}

fn layered(soft: &SoftGpu, mip_levels: u32, layer_count: u32, layout: ImageLayout) -> Arc<Texture> {
    Texture::freeform(
        soft.gpu(),
        TextureBuilder::new(Dimensions::new_2d(8, 8), format::R8G8B8A8_UNORM)
            .with_mip_levels(mip_levels)
            .with_layer_count(layer_count)
            .with_initial_layout(layout),
    )
    .unwrap()
}

fn fill_byte(level: u32, layer: u32) -> u8 {
    (1 + level * 16 + layer) as u8
}

fn barrier(image: ImageHandle, range: SubresourceRange, old_layout: ImageLayout, new_layout: ImageLayout) -> ImageBarrier {
    ImageBarrier {
        image,
        src_stage: PipelineStage::TRANSFER,
        dst_stage: PipelineStage::TRANSFER,
        src_access: Access::TRANSFER_WRITE,
        dst_access: Access::TRANSFER_WRITE,
        old_layout,
        new_layout,
        range,
    }
}

/// Gives every level and layer of `texture`, which is in `General`, its own fill byte.
fn fill_every_level(soft: &SoftGpu, texture: &Arc<Texture>) {
    let gpu = soft.gpu();
    let image = texture.backing().unwrap().unwrap();
    let layers = texture.layer_count();
    let range = SubresourceRange {
        aspect: ImageAspect::COLOR,
        base_mip_level: 0,
        level_count: texture.mip_levels(),
        base_array_layer: 0,
        layer_count: layers,
    };
    let mut buffers = Vec::new();
    let cycle = gpu
        .submit(|commands| {
            commands.pipeline_barrier(barrier(image, range, ImageLayout::General, ImageLayout::TransferDstOptimal));
            for level in 0..texture.mip_levels() {
                let extent = texture.dimensions().mip(level);
                let layer_size = format::R8G8B8A8_UNORM.size(extent);
                let staging = gpu.allocator().allocate_staging_buffer(layer_size * layers as usize)?;
                staging.memory().write(|bytes| {
                    for (layer, chunk) in bytes.chunks_mut(layer_size).enumerate() {
                        chunk.fill(fill_byte(level, layer as u32));
                    }
                });
                commands.copy_buffer_to_image(
                    staging.handle(),
                    image,
                    ImageLayout::TransferDstOptimal,
                    BufferImageCopy {
                        buffer_offset: 0,
                        subresource: SubresourceLayers {
                            aspect: ImageAspect::COLOR,
                            mip_level: level,
                            base_array_layer: 0,
                            layer_count: layers,
                        },
                        extent,
                    },
                );
                buffers.push(staging);
            }
            commands.pipeline_barrier(barrier(image, range, ImageLayout::TransferDstOptimal, ImageLayout::General));
            Ok(())
        })
        .unwrap();
    cycle.wait();
}

fn filled(soft: &SoftGpu, texture: &Arc<Texture>, level: u32, layer: u32, byte: u8) -> bool {
    let image = texture.backing().unwrap().unwrap();
    soft.image_contents(image, level, layer)
        .is_some_and(|contents| contents.iter().all(|b| *b == byte))
}

#[test]
fn copy_from_copies_every_level_and_layer() {
    let soft = SoftGpu::new().unwrap();
    let source = layered(&soft, 3, 2, ImageLayout::General);
    fill_every_level(&soft, &source);

    let destination = layered(&soft, 3, 2, ImageLayout::Undefined);
    let whole = SubresourceRange {
        aspect: ImageAspect::COLOR,
        base_mip_level: 0,
        level_count: REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: REMAINING_ARRAY_LAYERS,
    };
    destination.copy_from(&source, whole).unwrap();
    destination.wait_on_fence().unwrap();
    for level in 0..3 {
        for layer in 0..2 {
            assert!(filled(&soft, &destination, level, layer, fill_byte(level, layer)), "level {level} layer {layer}");
        }
    }

    // only the upper levels of the second layer
    let partial = layered(&soft, 3, 2, ImageLayout::ShaderReadOnlyOptimal);
    let upper = SubresourceRange {
        aspect: ImageAspect::COLOR,
        base_mip_level: 1,
        level_count: REMAINING_MIP_LEVELS,
        base_array_layer: 1,
        layer_count: 1,
    };
    partial.copy_from(&source, upper).unwrap();
    partial.wait_on_fence().unwrap();
    assert!(filled(&soft, &partial, 1, 1, fill_byte(1, 1)));
    assert!(filled(&soft, &partial, 2, 1, fill_byte(2, 1)));
    assert!(filled(&soft, &partial, 0, 1, 0));
    assert!(filled(&soft, &partial, 1, 0, 0));
    let partial_image = partial.backing().unwrap().unwrap();
    assert_eq!(soft.image_layout(partial_image, 2, 1), Some(ImageLayout::ShaderReadOnlyOptimal));
    assert_eq!(partial.layout().unwrap(), ImageLayout::ShaderReadOnlyOptimal);
    assert!(soft.validation_errors().is_empty());
}

#[test]
fn copy_from_resolves_the_range_against_the_destination() {
    let soft = SoftGpu::new().unwrap();
    let source = layered(&soft, 3, 1, ImageLayout::General);
    fill_every_level(&soft, &source);

    // the destination only has a base level, so that is all that is copied
    let single = layered(&soft, 1, 1, ImageLayout::General);
    single.copy_from(&source, SubresourceRange::whole(ImageAspect::COLOR)).unwrap();
    single.wait_on_fence().unwrap();
    assert!(filled(&soft, &single, 0, 0, fill_byte(0, 0)));
    assert!(soft.validation_errors().is_empty());

    let deeper = layered(&soft, 4, 1, ImageLayout::General);
    let submitted = soft.submission_count();
    let three_levels = SubresourceRange {
        aspect: ImageAspect::COLOR,
        base_mip_level: 0,
        level_count: 3,
        base_array_layer: 0,
        layer_count: 1,
    };
    assert!(matches!(
        single.copy_from(&source, three_levels),
        Err(Error::CopyRangeOutOfBounds(_))
    ));
    // the source lacks the levels the destination asks for
    assert!(matches!(
        deeper.copy_from(&source, SubresourceRange::whole(ImageAspect::COLOR)),
        Err(Error::CopyRangeOutOfBounds(_))
    ));
    let past_the_layers = SubresourceRange {
        base_array_layer: 1,
        ..SubresourceRange::whole(ImageAspect::COLOR)
    };
    assert!(matches!(
        single.copy_from(&source, past_the_layers),
        Err(Error::CopyRangeOutOfBounds(_))
    ));
    assert_eq!(soft.submission_count(), submitted);
    assert!(soft.validation_errors().is_empty());
}

#[test]
fn opposite_copies_do_not_deadlock() {
    let soft = SoftGpu::new().unwrap();
    let a = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::General);
    let b = freeform(&soft, Dimensions::new_2d(8, 8), ImageLayout::General);
    let range = SubresourceRange::whole(ImageAspect::COLOR);
    let threads: Vec<_> = [(a.clone(), b.clone()), (b.clone(), a.clone())]
        .into_iter()
        .map(|(to, from)| {
            std::thread::spawn(move || {
                for _ in 0..20 {
                    to.copy_from(&from, range).unwrap();
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    a.wait_on_fence().unwrap();
    b.wait_on_fence().unwrap();
    assert!(soft.validation_errors().is_empty());
}

#[test]
fn views_are_cached_by_descriptor() {
    let soft = SoftGpu::new().unwrap();
    let texture = Texture::freeform(
        soft.gpu(),
        TextureBuilder::new(Dimensions::new_2d(8, 8), format::R8G8B8A8_UNORM)
            .with_mip_levels(2)
            .with_layer_count(4)
            .with_initial_layout(ImageLayout::ShaderReadOnlyOptimal),
    )
    .unwrap();
    let whole = SubresourceRange {
        aspect: ImageAspect::COLOR,
        base_mip_level: 0,
        level_count: REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: REMAINING_ARRAY_LAYERS,
    };
    let first = TextureView::new(texture.clone(), None, ComponentMapping::default(), whole);
    let second = TextureView::new(texture.clone(), None, ComponentMapping::default(), whole);
    assert_eq!(first.view().unwrap(), first.view().unwrap());
    assert_eq!(first.view().unwrap(), second.view().unwrap());
    assert_eq!(first.descriptor().unwrap().view_type, ImageViewType::D2Array);
    assert_eq!(first.descriptor().unwrap().range.layer_count, 4);

    let single_layer = SubresourceRange {
        base_array_layer: 2,
        layer_count: 1,
        ..whole
    };
    let layer = TextureView::new(texture.clone(), None, ComponentMapping::default(), single_layer);
    assert_ne!(layer.view().unwrap(), first.view().unwrap());
    assert_eq!(layer.descriptor().unwrap().view_type, ImageViewType::D2);

    let swizzled = ComponentMapping {
        r: ComponentSwizzle::B,
        b: ComponentSwizzle::R,
        ..Default::default()
    };
    let reinterpreted = TextureView::new(texture.clone(), Some(format::B8G8R8A8_UNORM), swizzled, whole);
    assert_eq!(reinterpreted.format(), format::B8G8R8A8_UNORM);
    assert_ne!(reinterpreted.view().unwrap(), first.view().unwrap());
    assert_eq!(soft.view_count(), 3);
}

#[test]
fn views_need_a_backing() {
    let soft = SoftGpu::new().unwrap();
    let texture = Texture::from_backing(
        soft.gpu(),
        Backing::None,
        TextureInfo::new(Dimensions::new_2d(8, 8), format::R8G8B8A8_UNORM),
    )
    .unwrap();
    let view = TextureView::new(texture, None, ComponentMapping::default(), SubresourceRange::whole(ImageAspect::COLOR));
    assert!(matches!(view.view(), Err(Error::NoBacking)));
}
