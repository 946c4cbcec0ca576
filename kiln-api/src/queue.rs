use crate::backends::{KilnBackend, KilnNativeHandle};
use crate::internal::{KilnFrameCounters, KilnFrameFence};
use crate::{
    KilnCommandBuffer, KilnCommandBufferDef, KilnDeviceContext, KilnError, KilnQueueType,
    KilnResult,
};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A closed command list waiting for its queue to execute it
pub(crate) struct KilnCommittedCommandList {
    pub(crate) execution_order: u64,
    pub(crate) command_list: KilnNativeHandle,
}

struct KilnPooledCommandList {
    command_list: KilnNativeHandle,
    // The list may be reset once the frame fence reaches this value
    reusable_at: u64,
}

/// Device-owned state of a queue. `KilnQueue` is just a handle to this.
pub(crate) struct KilnQueueInner {
    queue_type: KilnQueueType,
    native_queue: KilnNativeHandle,
    next_execution_order: AtomicU64,
    commit_tx: Sender<KilnCommittedCommandList>,
    commit_rx: Receiver<KilnCommittedCommandList>,
    command_list_pool: Mutex<Vec<KilnPooledCommandList>>,
}

impl KilnQueueInner {
    pub fn new(
        queue_type: KilnQueueType,
        native_queue: KilnNativeHandle,
    ) -> Self {
        let (commit_tx, commit_rx) = crossbeam_channel::unbounded();
        KilnQueueInner {
            queue_type,
            native_queue,
            next_execution_order: AtomicU64::new(1),
            commit_tx,
            commit_rx,
            command_list_pool: Default::default(),
        }
    }

    pub fn native_queue(&self) -> KilnNativeHandle {
        self.native_queue
    }

    pub fn reserve_execution_order(&self) -> u64 {
        self.next_execution_order.fetch_add(1, Ordering::Relaxed)
    }

    pub fn commit(
        &self,
        committed: KilnCommittedCommandList,
    ) -> KilnResult<()> {
        self.commit_tx
            .send(committed)
            .map_err(|_| KilnError::DeviceDestroyed)
    }

    /// Take a pooled command list the GPU is provably done with, or create a new one. Either way
    /// the list is reset and open for recording.
    pub fn acquire_command_list(
        &self,
        backend: &dyn KilnBackend,
        frame_fence: &KilnFrameFence,
    ) -> KilnResult<KilnNativeHandle> {
        let pooled = {
            let mut pool = self.command_list_pool.lock().unwrap();
            let completed = frame_fence.completed_value()?;
            let reusable_index = pool.iter().position(|x| x.reusable_at <= completed);
            reusable_index.map(|index| pool.swap_remove(index).command_list)
        };

        let command_list = match pooled {
            Some(command_list) => {
                log::trace!("Reusing command list {:?}", command_list);
                command_list
            }
            None => backend.create_command_list(self.queue_type)?,
        };

        backend.reset_command_list(command_list)?;
        Ok(command_list)
    }

    pub fn return_command_list(
        &self,
        command_list: KilnNativeHandle,
        reusable_at: u64,
    ) {
        self.command_list_pool
            .lock()
            .unwrap()
            .push(KilnPooledCommandList {
                command_list,
                reusable_at,
            });
    }

    /// Execute everything committed so far, sorted by execution order. Must be called with the
    /// device's frame lock held so that the work lands before the next fence signal.
    pub fn flush(
        &self,
        backend: &dyn KilnBackend,
        counters: &KilnFrameCounters,
    ) -> KilnResult<usize> {
        let mut committed: Vec<_> = self.commit_rx.try_iter().collect();
        if committed.is_empty() {
            return Ok(0);
        }

        committed.sort_by_key(|x| x.execution_order);
        let command_lists: Vec<_> = committed.iter().map(|x| x.command_list).collect();

        log::trace!(
            "{:?} queue executing {} command lists in frame {}",
            self.queue_type,
            command_lists.len(),
            counters.cpu_frame()
        );

        let result = backend.execute_command_lists(self.native_queue, &command_lists);

        // Work executed during frame f is covered by fence value f + 1. If execution failed the
        // lists are still returned to the pool, a reset makes them usable again.
        let reusable_at = counters.cpu_frame() + 1;
        for command_list in command_lists {
            self.return_command_list(command_list, reusable_at);
        }

        result.map(|_| committed.len())
    }

    pub fn pooled_command_list_count(&self) -> usize {
        self.command_list_pool.lock().unwrap().len()
    }

    /// Release every command list and the native queue. The GPU must be idle.
    pub fn destroy(
        &self,
        backend: &dyn KilnBackend,
    ) {
        let pending = self.commit_rx.try_iter().map(|x| x.command_list);
        let pooled: Vec<_> = self
            .command_list_pool
            .lock()
            .unwrap()
            .drain(..)
            .map(|x| x.command_list)
            .collect();

        for command_list in pending.chain(pooled) {
            release_and_check(backend, command_list);
        }

        release_and_check(backend, self.native_queue);
    }
}

fn release_and_check(
    backend: &dyn KilnBackend,
    handle: KilnNativeHandle,
) {
    let remaining = backend.release(handle);
    if remaining != 0 {
        log::warn!(
            "{:?} still has {} references after release",
            handle,
            remaining
        );
    }
}

/// A queue that command buffers are created from and submitted to.
///
/// Command buffers may be committed from any thread in any order. `submit` executes them sorted
/// by their execution order.
#[derive(Clone, Debug)]
pub struct KilnQueue {
    device_context: KilnDeviceContext,
    queue_type: KilnQueueType,
}

impl KilnQueue {
    pub(crate) fn new(
        device_context: KilnDeviceContext,
        queue_type: KilnQueueType,
    ) -> Self {
        KilnQueue {
            device_context,
            queue_type,
        }
    }

    pub fn queue_type(&self) -> KilnQueueType {
        self.queue_type
    }

    pub fn device_context(&self) -> &KilnDeviceContext {
        &self.device_context
    }

    pub fn native_queue(&self) -> KilnNativeHandle {
        self.inner().native_queue()
    }

    pub(crate) fn inner(&self) -> &KilnQueueInner {
        self.device_context.queue_inner(self.queue_type)
    }

    pub fn create_command_buffer(
        &self,
        command_buffer_def: &KilnCommandBufferDef,
    ) -> KilnResult<KilnCommandBuffer> {
        KilnCommandBuffer::new(self, command_buffer_def)
    }

    /// Execute all committed command buffers. `KilnDeviceContext::advance_frame` does this for
    /// every queue too.
    pub fn submit(&self) -> KilnResult<usize> {
        profiling::scope!("KilnQueue::submit");
        self.device_context.submit_queue(self.queue_type)
    }

    /// Number of command lists waiting in the pool for reuse
    pub fn pooled_command_list_count(&self) -> usize {
        self.inner().pooled_command_list_count()
    }
}
