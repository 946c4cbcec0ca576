use super::frame_fence::KilnFrameCounters;
use crate::{KilnDescriptorHandle, KilnNativeHandle};
use kiln_base::FrameBuckets;

/// Something whose destruction has to wait until the GPU is done with it
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum KilnDeferredRelease {
    /// A native object, released through the backend
    Native(KilnNativeHandle),
    /// A persistent descriptor slot, returned to its heap's free list
    Descriptor(KilnDescriptorHandle),
}

/// Holds releases that were requested while frames were in flight, until the frame fence proves
/// the GPU has finished every frame that could have referenced them.
///
/// This type only decides *when* something may be released. Actually releasing it is the
/// caller's job, which keeps backend calls outside of the lock that guards this queue's owner.
pub(crate) struct KilnDeferredReleaseQueue {
    buckets: FrameBuckets<KilnDeferredRelease>,
}

impl KilnDeferredReleaseQueue {
    pub fn new(render_latency: u32) -> Self {
        KilnDeferredReleaseQueue {
            buckets: FrameBuckets::new(render_latency),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Returns the entry back if it may be released right now, otherwise holds on to it in the
    /// bucket of the current CPU frame and returns None
    pub fn release(
        &mut self,
        counters: &KilnFrameCounters,
        entry: KilnDeferredRelease,
        force_deferred: bool,
    ) -> Option<KilnDeferredRelease> {
        if counters.is_idle() && !force_deferred {
            Some(entry)
        } else {
            log::trace!(
                "defer release of {:?} until frame {} retires",
                entry,
                counters.cpu_frame()
            );
            self.buckets.push(counters.cpu_frame(), entry);
            None
        }
    }

    /// Empty a single bucket. Errors if the bucket's owning frame has not been retired yet.
    pub fn drain(
        &mut self,
        gpu_frame: u64,
        slot: usize,
    ) -> Result<Vec<KilnDeferredRelease>, u64> {
        match self.buckets.owning_frame(slot) {
            Some(owning_frame) if owning_frame >= gpu_frame => Err(owning_frame),
            _ => Ok(self.buckets.drain_slot(slot)),
        }
    }

    /// Everything pushed while the CPU was on a frame older than `gpu_frame`. Work recorded
    /// during frame `f` is covered by fence value `f + 1`.
    pub fn drain_retired(
        &mut self,
        gpu_frame: u64,
    ) -> Vec<KilnDeferredRelease> {
        profiling::scope!("KilnDeferredReleaseQueue::drain_retired");
        let mut drained = Vec::default();
        for slot in 0..self.buckets.slot_count() as usize {
            if let Ok(mut entries) = self.drain(gpu_frame, slot) {
                drained.append(&mut entries);
            }
        }

        drained
    }

    /// Only valid once the GPU is idle
    pub fn drain_all(&mut self) -> Vec<KilnDeferredRelease> {
        self.buckets.drain_all()
    }
}

impl Drop for KilnDeferredReleaseQueue {
    fn drop(&mut self) {
        if !self.buckets.is_empty() {
            log::warn!(
                "Deferred release queue dropped with {} entries still pending",
                self.buckets.len()
            );
        }
    }
}
