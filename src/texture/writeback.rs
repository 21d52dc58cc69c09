// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Deferred write-back of host texels into guest memory.

use std::sync::Arc;

use crate::copy;
use crate::fence::FenceCycle;
use crate::guest::{GuestMapping, GuestTexture};
use crate::memory::{HostMemory, StagingBuffer};

/// Tiles host texels back into guest memory once the GPU has produced them.
///
/// Consumed when it runs, so it can run at most once.
pub(crate) struct GuestWriteback {
    guest: GuestTexture,
    mapping: GuestMapping,
    source: HostMemory,
    _staging: Option<Arc<StagingBuffer>>,
}

impl GuestWriteback {
    /// Writes back whatever the GPU copied into `staging`.
    pub(crate) fn from_staging(guest: GuestTexture, mapping: GuestMapping, staging: Arc<StagingBuffer>) -> Self {
        GuestWriteback {
            guest,
            mapping,
            source: staging.memory().clone(),
            _staging: Some(staging),
        }
    }

    /// Writes back the contents of a host-mapped image.
    pub(crate) fn from_mapped(guest: GuestTexture, mapping: GuestMapping, memory: HostMemory) -> Self {
        GuestWriteback {
            guest,
            mapping,
            source: memory,
            _staging: None,
        }
    }

    /// Runs the write-back no earlier than `cycle` completing.
    pub(crate) fn schedule(self, cycle: &FenceCycle) {
        cycle.on_complete(move || self.run());
    }

    pub(crate) fn run(self) {
        logwise::trace_sync!(
            "Writing {size} bytes back to the guest",
            size = self.guest.size()
        );
        self.source.read(|linear| {
            // SAFETY: the mapping was validated against the surface size, and the guest address
            // space does not touch texture memory while a write-back is pending.
            let guest_bytes = unsafe { self.mapping.as_mut_slice() };
            copy::copy_linear_to_guest(&self.guest, linear, guest_bytes);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{self, Dimensions};
    use crate::guest::TileConfig;

    #[test]
    fn runs_only_after_completion() {
        let guest_bytes: &'static mut [u8] = Box::leak(vec![0u8; 16].into_boxed_slice());
        let mapping = GuestMapping::from_static(guest_bytes);
        let guest = GuestTexture::new(
            Dimensions::new_2d(2, 2),
            format::R8G8B8A8_UNORM,
            TileConfig::Linear,
            vec![mapping],
        );
        let memory = HostMemory::new(16);
        memory.write(|bytes| bytes.fill(0xAB));

        let cycle = FenceCycle::new();
        GuestWriteback::from_mapped(guest, mapping, memory).schedule(&cycle);
        // SAFETY: nothing else touches the leaked buffer
        let read = || unsafe { mapping.as_slice() }.to_vec();
        assert_eq!(read(), vec![0u8; 16]);
        cycle.signal();
        assert_eq!(read(), vec![0xABu8; 16]);
    }
}
