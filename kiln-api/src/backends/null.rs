//! A software backend with no GPU behind it.
//!
//! Objects are plain entries in a table, descriptor heaps get synthetic address ranges, and the
//! "GPU" completes fence values either as soon as they are signaled (`Immediate`) or only when
//! told to via `retire_through` (`Manual`). Everything the core does to the backend is logged so
//! it can be inspected: executed command lists (with their commands), released handles, and
//! releases of handles that were not alive.

use super::*;
use crate::KilnError;
use fnv::FnvHashMap;
use std::sync::{Condvar, Mutex, MutexGuard};

// Arbitrary, but far apart so that CPU and GPU addresses are easy to tell apart when debugging
const FIRST_CPU_DESCRIPTOR_ADDRESS: usize = 0x1000_0000;
const FIRST_GPU_DESCRIPTOR_ADDRESS: u64 = 0x8000_0000_0000;
const HEAP_ADDRESS_ALIGNMENT: u64 = 0x1_0000;

/// How the simulated GPU completes fence signals
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KilnNullRetireMode {
    /// Work completes the moment it is signaled
    Immediate,
    /// Work completes only when `retire_through` is called
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KilnNullObjectType {
    DescriptorHeap {
        heap_type: KilnDescriptorHeapType,
        shader_visible: bool,
        descriptor_count: u32,
    },
    Fence,
    Queue(KilnQueueType),
    CommandList(KilnQueueType),
    Buffer,
    Texture,
    Sampler,
    Swapchain,
    SwapchainImage,
}

/// A command list as it was when a queue executed it
#[derive(Clone, Debug)]
pub struct KilnNullExecution {
    pub queue: KilnNativeHandle,
    pub command_list: KilnNativeHandle,
    pub commands: Vec<KilnNativeCommand>,
}

struct NullObject {
    object_type: KilnNullObjectType,
    ref_count: u32,
}

#[derive(Default)]
struct NullFence {
    signaled: u64,
    completed: u64,
}

#[derive(Default)]
struct NullCommandList {
    commands: Vec<KilnNativeCommand>,
    open: bool,
}

struct NullState {
    retire_mode: KilnNullRetireMode,
    next_handle: u64,
    next_cpu_address: u64,
    next_gpu_address: u64,
    objects: FnvHashMap<KilnNativeHandle, NullObject>,
    fences: FnvHashMap<KilnNativeHandle, NullFence>,
    command_lists: FnvHashMap<KilnNativeHandle, NullCommandList>,
    executions: Vec<KilnNullExecution>,
    released: Vec<KilnNativeHandle>,
    double_release_count: u32,
    // Number of creations that still succeed before one fails
    fail_creation_countdown: Option<u32>,
    fail_next_wait: bool,
}

impl NullState {
    fn create_object(
        &mut self,
        object_type: KilnNullObjectType,
    ) -> KilnResult<KilnNativeHandle> {
        match self.fail_creation_countdown {
            Some(0) => {
                self.fail_creation_countdown = None;
                return Err(KilnError::DeviceCreationFailed(format!(
                    "null backend was told to fail creating {:?}",
                    object_type
                )));
            }
            Some(remaining) => self.fail_creation_countdown = Some(remaining - 1),
            None => {}
        }

        self.next_handle += 1;
        let handle = KilnNativeHandle(self.next_handle);
        log::trace!("null backend create {:?} {:?}", handle, object_type);
        self.objects.insert(
            handle,
            NullObject {
                object_type,
                ref_count: 1,
            },
        );
        Ok(handle)
    }

    fn retire_fences_through(
        &mut self,
        value: u64,
    ) {
        for fence in self.fences.values_mut() {
            let retire_to = value.min(fence.signaled);
            fence.completed = fence.completed.max(retire_to);
        }
    }
}

pub struct KilnNullBackend {
    state: Mutex<NullState>,
    fence_progress: Condvar,
}

impl std::fmt::Debug for KilnNullBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        f.debug_struct("KilnNullBackend").finish()
    }
}

impl KilnNullBackend {
    pub fn new(retire_mode: KilnNullRetireMode) -> Self {
        KilnNullBackend {
            state: Mutex::new(NullState {
                retire_mode,
                next_handle: 0,
                next_cpu_address: FIRST_CPU_DESCRIPTOR_ADDRESS as u64,
                next_gpu_address: FIRST_GPU_DESCRIPTOR_ADDRESS,
                objects: Default::default(),
                fences: Default::default(),
                command_lists: Default::default(),
                executions: Default::default(),
                released: Default::default(),
                double_release_count: 0,
                fail_creation_countdown: None,
                fail_next_wait: false,
            }),
            fence_progress: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<NullState> {
        self.state.lock().unwrap()
    }

    pub fn retire_mode(&self) -> KilnNullRetireMode {
        self.state().retire_mode
    }

    /// Switching to `Immediate` also completes everything signaled so far
    pub fn set_retire_mode(
        &self,
        retire_mode: KilnNullRetireMode,
    ) {
        let mut state = self.state();
        state.retire_mode = retire_mode;
        if retire_mode == KilnNullRetireMode::Immediate {
            state.retire_fences_through(u64::MAX);
            self.fence_progress.notify_all();
        }
    }

    /// Simulate the GPU finishing all work up to and including fence `value`. Fences never
    /// complete past what has been signaled on them.
    pub fn retire_through(
        &self,
        value: u64,
    ) {
        let mut state = self.state();
        state.retire_fences_through(value);
        self.fence_progress.notify_all();
    }

    /// The next native creation call fails with `DeviceCreationFailed`
    pub fn fail_next_creation(&self) {
        self.fail_creation_after(0);
    }

    /// Let `count` more native creations succeed, then fail the one after with
    /// `DeviceCreationFailed`
    pub fn fail_creation_after(
        &self,
        count: u32,
    ) {
        self.state().fail_creation_countdown = Some(count);
    }

    /// The next `wait_fence` call returns an error instead of blocking, like a lost device
    pub fn fail_next_wait(&self) {
        self.state().fail_next_wait = true;
    }

    pub fn executions(&self) -> Vec<KilnNullExecution> {
        self.state().executions.clone()
    }

    pub fn executed_command_lists(&self) -> Vec<KilnNativeHandle> {
        self.state()
            .executions
            .iter()
            .map(|x| x.command_list)
            .collect()
    }

    pub fn released_handles(&self) -> Vec<KilnNativeHandle> {
        self.state().released.clone()
    }

    pub fn is_released(
        &self,
        handle: KilnNativeHandle,
    ) -> bool {
        self.state().released.contains(&handle)
    }

    pub fn is_live(
        &self,
        handle: KilnNativeHandle,
    ) -> bool {
        self.state().objects.contains_key(&handle)
    }

    pub fn object_type(
        &self,
        handle: KilnNativeHandle,
    ) -> Option<KilnNullObjectType> {
        self.state()
            .objects
            .get(&handle)
            .map(|x| x.object_type.clone())
    }

    pub fn live_object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Number of `release` calls on handles that were not alive
    pub fn double_release_count(&self) -> u32 {
        self.state().double_release_count
    }
}

impl KilnBackend for KilnNullBackend {
    fn query_capabilities(&self) -> KilnResult<KilnDeviceInfo> {
        Ok(KilnDeviceInfo {
            backend_name: "null",
            supports_multithreaded_usage: true,
            max_shader_visible_view_descriptors: 1_000_000,
            max_shader_visible_sampler_descriptors: 2048,
        })
    }

    fn descriptor_increment(
        &self,
        heap_type: KilnDescriptorHeapType,
    ) -> u32 {
        match heap_type {
            KilnDescriptorHeapType::CbvSrvUav => 32,
            KilnDescriptorHeapType::Sampler => 16,
            KilnDescriptorHeapType::Rtv => 32,
            KilnDescriptorHeapType::Dsv => 8,
        }
    }

    fn create_descriptor_heap(
        &self,
        heap_type: KilnDescriptorHeapType,
        descriptor_count: u32,
        shader_visible: bool,
    ) -> KilnResult<KilnNativeHeap> {
        let increment = self.descriptor_increment(heap_type) as u64;
        let mut state = self.state();
        let handle = state.create_object(KilnNullObjectType::DescriptorHeap {
            heap_type,
            shader_visible,
            descriptor_count,
        })?;

        let byte_size = descriptor_count as u64 * increment;
        let reserved = (byte_size / HEAP_ADDRESS_ALIGNMENT + 1) * HEAP_ADDRESS_ALIGNMENT;

        let cpu_first_handle = state.next_cpu_address as usize;
        state.next_cpu_address += reserved;

        let gpu_first_handle = if shader_visible {
            let gpu_first_handle = state.next_gpu_address;
            state.next_gpu_address += reserved;
            Some(gpu_first_handle)
        } else {
            None
        };

        Ok(KilnNativeHeap {
            handle,
            cpu_first_handle,
            gpu_first_handle,
        })
    }

    fn create_view(
        &self,
        _heap_type: KilnDescriptorHeapType,
        resource: KilnNativeHandle,
        _cpu_handle: usize,
    ) -> KilnResult<()> {
        if self.state().objects.contains_key(&resource) {
            Ok(())
        } else {
            Err(KilnError::StringError(format!(
                "Tried to create a view of {:?}, which is not alive",
                resource
            )))
        }
    }

    fn create_fence(
        &self,
        initial_value: u64,
    ) -> KilnResult<KilnNativeHandle> {
        let mut state = self.state();
        let handle = state.create_object(KilnNullObjectType::Fence)?;
        state.fences.insert(
            handle,
            NullFence {
                signaled: initial_value,
                completed: initial_value,
            },
        );
        Ok(handle)
    }

    fn signal_fence(
        &self,
        queue: KilnNativeHandle,
        fence: KilnNativeHandle,
        value: u64,
    ) -> KilnResult<()> {
        let mut state = self.state();
        if !state.objects.contains_key(&queue) {
            return Err(KilnError::StringError(format!(
                "Signaled on unknown queue {:?}",
                queue
            )));
        }

        let retire_mode = state.retire_mode;
        let null_fence = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| KilnError::StringError(format!("Unknown fence {:?}", fence)))?;

        null_fence.signaled = null_fence.signaled.max(value);
        if retire_mode == KilnNullRetireMode::Immediate {
            null_fence.completed = null_fence.signaled;
            self.fence_progress.notify_all();
        }

        Ok(())
    }

    fn fence_completed_value(
        &self,
        fence: KilnNativeHandle,
    ) -> KilnResult<u64> {
        self.state()
            .fences
            .get(&fence)
            .map(|x| x.completed)
            .ok_or_else(|| KilnError::StringError(format!("Unknown fence {:?}", fence)))
    }

    fn wait_fence(
        &self,
        fence: KilnNativeHandle,
        value: u64,
    ) -> KilnResult<()> {
        let mut state = self.state();
        if state.fail_next_wait {
            state.fail_next_wait = false;
            return Err(KilnError::StringError(format!(
                "null backend was told to fail waiting for value {} on fence {:?}",
                value, fence
            )));
        }

        loop {
            let null_fence = state
                .fences
                .get(&fence)
                .ok_or_else(|| KilnError::StringError(format!("Unknown fence {:?}", fence)))?;

            if null_fence.completed >= value {
                return Ok(());
            }

            // A real GPU would hang here forever
            if null_fence.signaled < value {
                return Err(KilnError::StringError(format!(
                    "Waiting for value {} on fence {:?} that has only been signaled up to {}",
                    value, fence, null_fence.signaled
                )));
            }

            state = self.fence_progress.wait(state).unwrap();
        }
    }

    fn create_queue(
        &self,
        queue_type: KilnQueueType,
    ) -> KilnResult<KilnNativeHandle> {
        self.state()
            .create_object(KilnNullObjectType::Queue(queue_type))
    }

    fn create_command_list(
        &self,
        queue_type: KilnQueueType,
    ) -> KilnResult<KilnNativeHandle> {
        let mut state = self.state();
        let handle = state.create_object(KilnNullObjectType::CommandList(queue_type))?;
        state
            .command_lists
            .insert(handle, NullCommandList::default());
        Ok(handle)
    }

    fn reset_command_list(
        &self,
        command_list: KilnNativeHandle,
    ) -> KilnResult<()> {
        let mut state = self.state();
        let list = state.command_lists.get_mut(&command_list).ok_or_else(|| {
            KilnError::StringError(format!("Unknown command list {:?}", command_list))
        })?;
        list.commands.clear();
        list.open = true;
        Ok(())
    }

    fn record_command(
        &self,
        command_list: KilnNativeHandle,
        command: &KilnNativeCommand,
    ) -> KilnResult<()> {
        let mut state = self.state();
        let list = state.command_lists.get_mut(&command_list).ok_or_else(|| {
            KilnError::StringError(format!("Unknown command list {:?}", command_list))
        })?;

        if !list.open {
            return Err(KilnError::StringError(format!(
                "Recorded into closed command list {:?}",
                command_list
            )));
        }

        list.commands.push(command.clone());
        Ok(())
    }

    fn close_command_list(
        &self,
        command_list: KilnNativeHandle,
    ) -> KilnResult<()> {
        let mut state = self.state();
        let list = state.command_lists.get_mut(&command_list).ok_or_else(|| {
            KilnError::StringError(format!("Unknown command list {:?}", command_list))
        })?;
        list.open = false;
        Ok(())
    }

    fn execute_command_lists(
        &self,
        queue: KilnNativeHandle,
        command_lists: &[KilnNativeHandle],
    ) -> KilnResult<()> {
        let mut state = self.state();
        for &command_list in command_lists {
            let list = state.command_lists.get(&command_list).ok_or_else(|| {
                KilnError::StringError(format!("Unknown command list {:?}", command_list))
            })?;

            if list.open {
                return Err(KilnError::StringError(format!(
                    "Executed command list {:?} that was not closed",
                    command_list
                )));
            }

            let execution = KilnNullExecution {
                queue,
                command_list,
                commands: list.commands.clone(),
            };
            state.executions.push(execution);
        }

        Ok(())
    }

    fn create_resource(
        &self,
        desc: KilnNativeResourceDesc,
    ) -> KilnResult<KilnNativeHandle> {
        let mut state = self.state();
        let object_type = match desc {
            KilnNativeResourceDesc::Buffer(_) => KilnNullObjectType::Buffer,
            KilnNativeResourceDesc::Texture(_) => KilnNullObjectType::Texture,
            KilnNativeResourceDesc::Sampler(_) => KilnNullObjectType::Sampler,
            KilnNativeResourceDesc::Swapchain(_) => KilnNullObjectType::Swapchain,
            KilnNativeResourceDesc::SwapchainImage { swapchain, .. } => {
                if !state.objects.contains_key(&swapchain) {
                    return Err(KilnError::StringError(format!(
                        "Swapchain {:?} is not alive",
                        swapchain
                    )));
                }
                KilnNullObjectType::SwapchainImage
            }
        };

        state.create_object(object_type)
    }

    fn release(
        &self,
        handle: KilnNativeHandle,
    ) -> u32 {
        let mut state = self.state();
        let remaining = match state.objects.get_mut(&handle) {
            Some(object) => {
                object.ref_count -= 1;
                object.ref_count
            }
            None => {
                log::error!("null backend: released {:?} which is not alive", handle);
                state.double_release_count += 1;
                return 0;
            }
        };

        if remaining == 0 {
            log::trace!("null backend release {:?}", handle);
            state.objects.remove(&handle);
            state.fences.remove(&handle);
            state.command_lists.remove(&handle);
            state.released.push(handle);
        }

        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backend_with_fence(
        retire_mode: KilnNullRetireMode
    ) -> (KilnNullBackend, KilnNativeHandle, KilnNativeHandle) {
        let backend = KilnNullBackend::new(retire_mode);
        let queue = backend.create_queue(KilnQueueType::Graphics).unwrap();
        let fence = backend.create_fence(0).unwrap();
        (backend, queue, fence)
    }

    #[test]
    fn immediate_mode_completes_on_signal() {
        let (backend, queue, fence) = backend_with_fence(KilnNullRetireMode::Immediate);
        backend.signal_fence(queue, fence, 3).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 3);
        backend.wait_fence(fence, 3).unwrap();
    }

    #[test]
    fn manual_mode_waits_for_retire() {
        let (backend, queue, fence) = backend_with_fence(KilnNullRetireMode::Manual);
        backend.signal_fence(queue, fence, 2).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 0);

        // Retiring can't run ahead of what was signaled
        backend.retire_through(10);
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 2);
    }

    #[test]
    fn wait_blocks_until_another_thread_retires() {
        let (backend, queue, fence) = backend_with_fence(KilnNullRetireMode::Manual);
        let backend = Arc::new(backend);
        backend.signal_fence(queue, fence, 1).unwrap();

        let gpu = backend.clone();
        let gpu_thread = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            gpu.retire_through(1);
        });

        backend.wait_fence(fence, 1).unwrap();
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 1);
        gpu_thread.join().unwrap();
    }

    #[test]
    fn waiting_on_unsignaled_value_is_an_error() {
        let (backend, _queue, fence) = backend_with_fence(KilnNullRetireMode::Manual);
        assert!(backend.wait_fence(fence, 1).is_err());
    }

    #[test]
    fn heaps_get_disjoint_address_ranges() {
        let backend = KilnNullBackend::new(KilnNullRetireMode::Immediate);
        let a = backend
            .create_descriptor_heap(KilnDescriptorHeapType::CbvSrvUav, 1024, true)
            .unwrap();
        let b = backend
            .create_descriptor_heap(KilnDescriptorHeapType::CbvSrvUav, 1024, false)
            .unwrap();

        assert!(a.gpu_first_handle.is_some());
        assert!(b.gpu_first_handle.is_none());
        assert!(b.cpu_first_handle >= a.cpu_first_handle + 1024 * 32);
    }

    #[test]
    fn command_lists_must_be_closed_to_execute() {
        let backend = KilnNullBackend::new(KilnNullRetireMode::Immediate);
        let queue = backend.create_queue(KilnQueueType::Graphics).unwrap();
        let list = backend.create_command_list(KilnQueueType::Graphics).unwrap();
        backend.reset_command_list(list).unwrap();
        backend
            .record_command(list, &KilnNativeCommand::UnbindRenderTargets)
            .unwrap();
        assert!(backend.execute_command_lists(queue, &[list]).is_err());

        backend.close_command_list(list).unwrap();
        backend.execute_command_lists(queue, &[list]).unwrap();
        assert_eq!(backend.executions()[0].commands.len(), 1);
        assert!(backend
            .record_command(list, &KilnNativeCommand::UnbindRenderTargets)
            .is_err());
    }

    #[test]
    fn release_tracks_double_release() {
        let backend = KilnNullBackend::new(KilnNullRetireMode::Immediate);
        let buffer_def = crate::KilnBufferDef::for_uniform_buffer(64);
        let buffer = backend
            .create_resource(KilnNativeResourceDesc::Buffer(&buffer_def))
            .unwrap();
        assert_eq!(backend.release(buffer), 0);
        assert!(backend.is_released(buffer));
        assert_eq!(backend.double_release_count(), 0);

        backend.release(buffer);
        assert_eq!(backend.double_release_count(), 1);
    }

    #[test]
    fn fail_next_creation_fails_once() {
        let backend = KilnNullBackend::new(KilnNullRetireMode::Immediate);
        backend.fail_next_creation();
        assert!(matches!(
            backend.create_fence(0),
            Err(KilnError::DeviceCreationFailed(_))
        ));
        assert!(backend.create_fence(0).is_ok());
    }

    #[test]
    fn fail_creation_after_counts_down() {
        let backend = KilnNullBackend::new(KilnNullRetireMode::Immediate);
        backend.fail_creation_after(2);
        assert!(backend.create_fence(0).is_ok());
        assert!(backend.create_queue(KilnQueueType::Compute).is_ok());
        assert!(matches!(
            backend.create_fence(0),
            Err(KilnError::DeviceCreationFailed(_))
        ));
        assert!(backend.create_fence(0).is_ok());
    }

    #[test]
    fn fail_next_wait_fails_once() {
        let (backend, queue, fence) = backend_with_fence(KilnNullRetireMode::Immediate);
        backend.signal_fence(queue, fence, 1).unwrap();
        backend.fail_next_wait();
        assert!(backend.wait_fence(fence, 1).is_err());
        backend.wait_fence(fence, 1).unwrap();
    }
}
