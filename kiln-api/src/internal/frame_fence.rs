use crate::backends::{KilnBackend, KilnNativeHandle};
use crate::KilnResult;
use std::sync::Arc;

/// The CPU and GPU frame counters of a device.
///
/// `cpu_frame` counts frames submitted by the CPU. `gpu_frame` is the highest frame the fence has
/// proven complete. `gpu_frame <= cpu_frame` always holds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KilnFrameCounters {
    pub(crate) cpu_frame: u64,
    pub(crate) gpu_frame: u64,
}

impl KilnFrameCounters {
    pub fn cpu_frame(&self) -> u64 {
        self.cpu_frame
    }

    pub fn gpu_frame(&self) -> u64 {
        self.gpu_frame
    }

    pub fn frames_in_flight(&self) -> u64 {
        self.cpu_frame - self.gpu_frame
    }

    /// True when every submitted frame is known to be complete
    pub fn is_idle(&self) -> bool {
        self.cpu_frame == self.gpu_frame
    }
}

/// A queue and the fence it signals at the end of each frame
pub(crate) struct KilnFenceTimeline {
    pub(crate) queue: KilnNativeHandle,
    pub(crate) fence: KilnNativeHandle,
}

/// Bridges the CPU frame counter and the GPU's progress. Each queue has its own fence and all of
/// them are signaled with the same frame number, so a frame is complete once every queue's
/// fence has reached it.
pub(crate) struct KilnFrameFence {
    backend: Arc<dyn KilnBackend>,
    timelines: Vec<KilnFenceTimeline>,
    render_latency: u64,
}

impl KilnFrameFence {
    pub fn new(
        backend: Arc<dyn KilnBackend>,
        timelines: Vec<KilnFenceTimeline>,
        render_latency: u32,
    ) -> Self {
        assert!(render_latency > 0);
        KilnFrameFence {
            backend,
            timelines,
            render_latency: render_latency as u64,
        }
    }

    #[cfg(test)]
    pub fn render_latency(&self) -> u64 {
        self.render_latency
    }

    fn signal(
        &self,
        value: u64,
    ) -> KilnResult<()> {
        for timeline in &self.timelines {
            self.backend
                .signal_fence(timeline.queue, timeline.fence, value)?;
        }

        Ok(())
    }

    /// Highest frame value that every queue has completed
    pub fn completed_value(&self) -> KilnResult<u64> {
        let mut completed = u64::MAX;
        for timeline in &self.timelines {
            completed = completed.min(self.backend.fence_completed_value(timeline.fence)?);
        }

        Ok(completed)
    }

    /// Non-blocking poll
    pub fn is_signaled(
        &self,
        value: u64,
    ) -> KilnResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    /// Blocks until every queue has completed `value`. Can't be cancelled.
    pub fn wait_for(
        &self,
        value: u64,
    ) -> KilnResult<()> {
        profiling::scope!("KilnFrameFence::wait_for");
        for timeline in &self.timelines {
            if self.backend.fence_completed_value(timeline.fence)? < value {
                self.backend.wait_fence(timeline.fence, value)?;
            }
        }

        Ok(())
    }

    /// Submit the end of the current CPU frame. If that puts the CPU `render_latency` frames ahead
    /// of the GPU, block until the GPU finishes the oldest outstanding frame.
    ///
    /// `counters` is only updated if everything succeeds. Signaling the same value again on the
    /// next attempt is harmless.
    pub fn advance(
        &self,
        counters: &mut KilnFrameCounters,
    ) -> KilnResult<()> {
        let mut next = *counters;
        next.cpu_frame += 1;
        self.signal(next.cpu_frame)?;

        next.gpu_frame = next.gpu_frame.max(self.completed_value()?);
        if next.cpu_frame - next.gpu_frame >= self.render_latency {
            let wait_value = next.gpu_frame + 1;
            log::trace!(
                "cpu frame {} is {} frames ahead of the gpu, waiting for frame {}",
                next.cpu_frame,
                next.cpu_frame - next.gpu_frame,
                wait_value
            );

            self.wait_for(wait_value)?;
            next.gpu_frame = wait_value.max(self.completed_value()?);
        }

        debug_assert!(next.gpu_frame <= next.cpu_frame);
        debug_assert!(next.cpu_frame - next.gpu_frame < self.render_latency);
        *counters = next;
        Ok(())
    }

    /// Signal a new frame and wait for it, after which nothing is in flight. `counters` is left
    /// untouched on error.
    pub fn wait_idle(
        &self,
        counters: &mut KilnFrameCounters,
    ) -> KilnResult<()> {
        let idle_frame = counters.cpu_frame + 1;
        self.signal(idle_frame)?;
        self.wait_for(idle_frame)?;
        counters.cpu_frame = idle_frame;
        counters.gpu_frame = idle_frame;
        Ok(())
    }

    /// Release the native fences. The queues are owned elsewhere.
    pub fn destroy(&self) {
        for timeline in &self.timelines {
            let remaining = self.backend.release(timeline.fence);
            if remaining != 0 {
                log::warn!(
                    "Fence {:?} still has {} references after release",
                    timeline.fence,
                    remaining
                );
            }
        }
    }
}
