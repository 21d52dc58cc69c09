// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Conversions between the guest's tiled byte layouts and tightly packed linear surfaces.

Every codec function converts one whole layer: `format.size(dimensions)` bytes on the linear
side and [`guest_layer_size`] bytes on the guest side.  Partial regions are not supported.
Array layers follow each other in both representations.

# Block-linear

The guest GPU stores block-linear surfaces as GOBs (groups of bytes) of 64 bytes by 8 lines.
Each GOB is made of 16-byte by 1-line sectors, interleaved in a fixed swizzle.  GOBs are stacked
vertically into blocks `block_height` GOBs tall, blocks are laid out left to right into a ROB
(row of blocks) and ROBs follow each other top to bottom.  A surface is always padded to whole
GOBs horizontally and whole blocks vertically.

Surfaces with a depth greater than one are treated as a sequence of independent 2D slices.
*/

use crate::guest::{GuestTexture, TileConfig};

/// Width of a GOB in bytes.
const GOB_WIDTH: usize = 64;
/// Height of a GOB in lines.
const GOB_HEIGHT: usize = 8;
const GOB_SIZE: usize = GOB_WIDTH * GOB_HEIGHT;
/// Width of a sector in bytes.
const SECTOR_WIDTH: usize = 16;

/// Offset of byte `x` of line `y` inside a GOB.
fn gob_offset(x: usize, y: usize) -> usize {
    ((x % 64) / 32) * 256 + ((y % 8) / 2) * 64 + ((x % 32) / 16) * 32 + (y % 2) * 16 + (x % 16)
}

#[derive(Debug)]
struct BlockLinearLayout {
    /// Bytes in one packed line of blocks.
    line_bytes: usize,
    /// Lines of blocks in one slice.
    lines: usize,
    slices: usize,
    block_height: usize,
    rob_width_bytes: usize,
    rob_bytes: usize,
    slice_bytes: usize,
}

impl BlockLinearLayout {
    fn new(guest: &GuestTexture, block_height: u32) -> Self {
        let format = guest.format;
        let dimensions = guest.dimensions;
        let line_bytes = format.size_2d(dimensions.width, 1);
        let lines = dimensions.height.div_ceil(format.block_height) as usize;
        let block_height = block_height.max(1) as usize;
        let rob_height = GOB_HEIGHT * block_height;
        let rob_width_bytes = line_bytes.next_multiple_of(GOB_WIDTH);
        let rob_bytes = rob_width_bytes * rob_height;
        let robs = lines.div_ceil(rob_height);
        BlockLinearLayout {
            line_bytes,
            lines,
            slices: dimensions.depth.max(1) as usize,
            block_height,
            rob_width_bytes,
            rob_bytes,
            slice_bytes: robs * rob_bytes,
        }
    }

    /// Offset in guest memory of the sector holding byte `x` of line `y`.
    fn guest_offset(&self, x: usize, y: usize) -> usize {
        let rob_height = GOB_HEIGHT * self.block_height;
        let rob = y / rob_height;
        let gob_y = (y % rob_height) / GOB_HEIGHT;
        let block = x / GOB_WIDTH;
        rob * self.rob_bytes
            + block * GOB_SIZE * self.block_height
            + gob_y * GOB_SIZE
            + gob_offset(x % GOB_WIDTH, y % GOB_HEIGHT)
    }

    /// Calls `f(guest_offset, linear_offset, len)` for every sector-sized run of the surface.
    fn for_each_sector(&self, mut f: impl FnMut(usize, usize, usize)) {
        let linear_slice_bytes = self.line_bytes * self.lines;
        for slice in 0..self.slices {
            let guest_base = slice * self.slice_bytes;
            let linear_base = slice * linear_slice_bytes;
            for y in 0..self.lines {
                for x in (0..self.line_bytes).step_by(SECTOR_WIDTH) {
                    let len = SECTOR_WIDTH.min(self.line_bytes - x);
                    f(
                        guest_base + self.guest_offset(x, y),
                        linear_base + y * self.line_bytes + x,
                        len,
                    );
                }
            }
        }
    }
}

#[derive(Debug)]
struct PitchLinearLayout {
    line_bytes: usize,
    stride_bytes: usize,
    lines: usize,
}

impl PitchLinearLayout {
    fn new(guest: &GuestTexture, pitch: u32) -> Self {
        let format = guest.format;
        let dimensions = guest.dimensions;
        PitchLinearLayout {
            line_bytes: format.size_2d(dimensions.width, 1),
            stride_bytes: format.size_2d(pitch, 1),
            lines: dimensions.height.div_ceil(format.block_height) as usize
                * dimensions.depth.max(1) as usize,
        }
    }

    fn guest_size(&self) -> usize {
        match self.lines {
            0 => 0,
            lines => self.stride_bytes * (lines - 1) + self.line_bytes,
        }
    }
}

/// Bytes of guest memory one layer of `guest` occupies, padding included.
pub fn guest_layer_size(guest: &GuestTexture) -> usize {
    match guest.tile_config {
        TileConfig::Linear => guest.format.size(guest.dimensions),
        TileConfig::Pitch { pitch } => PitchLinearLayout::new(guest, pitch).guest_size(),
        TileConfig::Block { block_height } => {
            let layout = BlockLinearLayout::new(guest, block_height);
            layout.slice_bytes * layout.slices
        }
    }
}

fn check_sizes(guest: &GuestTexture, guest_bytes: &[u8], linear_bytes: &[u8]) {
    let guest_needed = guest_layer_size(guest);
    let linear_needed = guest.format.size(guest.dimensions);
    assert!(
        guest_bytes.len() >= guest_needed,
        "Guest surface holds {} bytes but {} are needed",
        guest_bytes.len(),
        guest_needed
    );
    assert!(
        linear_bytes.len() >= linear_needed,
        "Linear surface holds {} bytes but {} are needed",
        linear_bytes.len(),
        linear_needed
    );
}

/// Untiles a block-linear guest surface into a packed linear buffer.
///
/// # Panics
///
/// Panics if either buffer is smaller than the surface, or if `guest` is not block-linear.
pub fn copy_block_linear_to_linear(guest: &GuestTexture, guest_input: &[u8], linear_output: &mut [u8]) {
    let TileConfig::Block { block_height } = guest.tile_config else {
        panic!("Expected a block-linear surface, found {:?}", guest.tile_config);
    };
    check_sizes(guest, guest_input, linear_output);
    BlockLinearLayout::new(guest, block_height).for_each_sector(|guest_offset, linear_offset, len| {
        linear_output[linear_offset..linear_offset + len]
            .copy_from_slice(&guest_input[guest_offset..guest_offset + len]);
    });
}

/// Tiles a packed linear buffer into a block-linear guest surface.
///
/// Padding bytes of the guest surface are left untouched.
///
/// # Panics
///
/// Panics if either buffer is smaller than the surface, or if `guest` is not block-linear.
pub fn copy_linear_to_block_linear(guest: &GuestTexture, linear_input: &[u8], guest_output: &mut [u8]) {
    let TileConfig::Block { block_height } = guest.tile_config else {
        panic!("Expected a block-linear surface, found {:?}", guest.tile_config);
    };
    check_sizes(guest, guest_output, linear_input);
    BlockLinearLayout::new(guest, block_height).for_each_sector(|guest_offset, linear_offset, len| {
        guest_output[guest_offset..guest_offset + len]
            .copy_from_slice(&linear_input[linear_offset..linear_offset + len]);
    });
}

/// Copies each line of a pitch-linear guest surface into a packed linear buffer.
///
/// # Panics
///
/// Panics if either buffer is smaller than the surface, or if `guest` is not pitch-linear.
pub fn copy_pitch_linear_to_linear(guest: &GuestTexture, guest_input: &[u8], linear_output: &mut [u8]) {
    let TileConfig::Pitch { pitch } = guest.tile_config else {
        panic!("Expected a pitch-linear surface, found {:?}", guest.tile_config);
    };
    check_sizes(guest, guest_input, linear_output);
    let layout = PitchLinearLayout::new(guest, pitch);
    for line in 0..layout.lines {
        let input = line * layout.stride_bytes;
        let output = line * layout.line_bytes;
        linear_output[output..output + layout.line_bytes]
            .copy_from_slice(&guest_input[input..input + layout.line_bytes]);
    }
}

/// Copies each line of a packed linear buffer into a pitch-linear guest surface.
///
/// # Panics
///
/// Panics if either buffer is smaller than the surface, or if `guest` is not pitch-linear.
pub fn copy_linear_to_pitch_linear(guest: &GuestTexture, linear_input: &[u8], guest_output: &mut [u8]) {
    let TileConfig::Pitch { pitch } = guest.tile_config else {
        panic!("Expected a pitch-linear surface, found {:?}", guest.tile_config);
    };
    check_sizes(guest, guest_output, linear_input);
    let layout = PitchLinearLayout::new(guest, pitch);
    for line in 0..layout.lines {
        let input = line * layout.line_bytes;
        let output = line * layout.stride_bytes;
        guest_output[output..output + layout.line_bytes]
            .copy_from_slice(&linear_input[input..input + layout.line_bytes]);
    }
}

/// Untiles every layer of `guest_input` with whichever codec the guest's tile mode calls for.
pub(crate) fn copy_guest_to_linear(guest: &GuestTexture, guest_input: &[u8], linear_output: &mut [u8]) {
    let _perf = logwise::perfwarn_begin!("copy_guest_to_linear");
    let guest_stride = guest_layer_size(guest);
    let linear_stride = guest.format.size(guest.dimensions);
    for layer in 0..guest.layer_count as usize {
        let input = &guest_input[layer * guest_stride..(layer + 1) * guest_stride];
        let output = &mut linear_output[layer * linear_stride..(layer + 1) * linear_stride];
        match guest.tile_config {
            TileConfig::Block { .. } => copy_block_linear_to_linear(guest, input, output),
            TileConfig::Pitch { .. } => copy_pitch_linear_to_linear(guest, input, output),
            TileConfig::Linear => output.copy_from_slice(input),
        }
    }
}

/// Tiles every layer of `linear_input` into guest memory with whichever codec the guest's tile
/// mode calls for.
pub(crate) fn copy_linear_to_guest(guest: &GuestTexture, linear_input: &[u8], guest_output: &mut [u8]) {
    let _perf = logwise::perfwarn_begin!("copy_linear_to_guest");
    let guest_stride = guest_layer_size(guest);
    let linear_stride = guest.format.size(guest.dimensions);
    for layer in 0..guest.layer_count as usize {
        let input = &linear_input[layer * linear_stride..(layer + 1) * linear_stride];
        let output = &mut guest_output[layer * guest_stride..(layer + 1) * guest_stride];
        match guest.tile_config {
            TileConfig::Block { .. } => copy_linear_to_block_linear(guest, input, output),
            TileConfig::Pitch { .. } => copy_linear_to_pitch_linear(guest, input, output),
            TileConfig::Linear => output.copy_from_slice(input),
        }
    }
}
