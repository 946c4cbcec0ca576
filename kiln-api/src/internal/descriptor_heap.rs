use crate::backends::{KilnBackend, KilnNativeHandle, KilnNativeHeap};
use crate::error::invalid_operation;
use crate::{KilnApiDef, KilnDescriptorHeapType, KilnDeviceInfo, KilnError, KilnResult};
use kiln_base::IndexPool;
use std::sync::{Arc, Mutex};

/// Whether a descriptor lives until explicitly freed, or is a transient slot from a linear heap
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KilnDescriptorLifetime {
    Persistent,
    /// Valid until the linear heap with this generation is retired
    Linear { generation: u64 },
}

/// A range of one or more descriptor slots in a heap.
///
/// Everything needed to compute addresses is copied into the handle so that resolving it never
/// has to lock the heap.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KilnDescriptorHandle {
    pub(crate) heap_type: KilnDescriptorHeapType,
    pub(crate) shader_visible: bool,
    pub(crate) heap: KilnNativeHandle,
    pub(crate) index: u32,
    pub(crate) count: u32,
    pub(crate) increment: u32,
    pub(crate) cpu_first_handle: usize,
    pub(crate) gpu_first_handle: Option<u64>,
    pub(crate) lifetime: KilnDescriptorLifetime,
}

impl KilnDescriptorHandle {
    pub fn heap_type(&self) -> KilnDescriptorHeapType {
        self.heap_type
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    pub fn heap(&self) -> KilnNativeHandle {
        self.heap
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of consecutive slots. Always 1 for persistent descriptors.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn lifetime(&self) -> KilnDescriptorLifetime {
        self.lifetime
    }

    pub fn cpu_address(&self) -> usize {
        self.cpu_first_handle + (self.index as usize * self.increment as usize)
    }

    /// CPU address of the slot `offset` slots into this range. None if `offset` is past the end.
    pub fn cpu_address_at(
        &self,
        offset: u32,
    ) -> Option<usize> {
        if offset < self.count {
            Some(self.cpu_address() + offset as usize * self.increment as usize)
        } else {
            None
        }
    }

    /// Only shader-visible heaps have GPU addresses
    pub fn gpu_address(&self) -> Option<u64> {
        self.gpu_first_handle
            .map(|first| first + (self.index as u64 * self.increment as u64))
    }
}

struct KilnLinearHeap {
    native: KilnNativeHeap,
    allocated: u32,
    generation: u64,
}

struct KilnDescriptorHeapInner {
    persistent: KilnNativeHeap,
    persistent_slots: IndexPool,
    // Created on first use
    linear: Option<KilnLinearHeap>,
    next_generation: u64,
    destroyed: bool,
}

/// All descriptors of one (heap type, visibility) pair.
///
/// Persistent descriptors come from a fixed-size heap with a free list. Linear descriptors are
/// bump-allocated from a second heap which is replaced with a fresh one of the same size when it
/// runs out. The replaced heap is handed back to the caller, since frames in flight may still
/// reference it.
pub(crate) struct KilnDescriptorHeap {
    backend: Arc<dyn KilnBackend>,
    heap_type: KilnDescriptorHeapType,
    shader_visible: bool,
    increment: u32,
    linear_size: u32,
    inner: Mutex<KilnDescriptorHeapInner>,
}

impl KilnDescriptorHeap {
    pub fn new(
        backend: Arc<dyn KilnBackend>,
        heap_type: KilnDescriptorHeapType,
        shader_visible: bool,
        persistent_count: u32,
        linear_size: u32,
    ) -> KilnResult<Self> {
        assert!(!shader_visible || heap_type.supports_shader_visibility());
        assert!(linear_size > 0);

        let increment = backend.descriptor_increment(heap_type);
        let persistent =
            backend.create_descriptor_heap(heap_type, persistent_count, shader_visible)?;

        log::debug!(
            "Created {:?} descriptor heap (shader visible: {}) with {} persistent slots, linear heaps of {}",
            heap_type,
            shader_visible,
            persistent_count,
            linear_size
        );

        Ok(KilnDescriptorHeap {
            backend,
            heap_type,
            shader_visible,
            increment,
            linear_size,
            inner: Mutex::new(KilnDescriptorHeapInner {
                persistent,
                persistent_slots: IndexPool::new(persistent_count),
                linear: None,
                next_generation: 1,
                destroyed: false,
            }),
        })
    }

    #[cfg(test)]
    pub fn linear_size(&self) -> u32 {
        self.linear_size
    }

    #[cfg(test)]
    pub fn persistent_allocated_count(&self) -> u32 {
        self.inner.lock().unwrap().persistent_slots.allocated_count()
    }

    pub fn allocate_persistent(&self) -> KilnResult<KilnDescriptorHandle> {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return Err(KilnError::DeviceDestroyed);
        }

        let index = match inner.persistent_slots.allocate() {
            Some(index) => index,
            None => {
                let capacity = inner.persistent_slots.capacity();
                log::error!(
                    "{:?} descriptor heap (shader visible: {}) is out of persistent slots ({})",
                    self.heap_type,
                    self.shader_visible,
                    capacity
                );
                return Err(KilnError::Exhausted {
                    heap_type: self.heap_type,
                    shader_visible: self.shader_visible,
                    capacity,
                });
            }
        };

        Ok(KilnDescriptorHandle {
            heap_type: self.heap_type,
            shader_visible: self.shader_visible,
            heap: inner.persistent.handle,
            index,
            count: 1,
            increment: self.increment,
            cpu_first_handle: inner.persistent.cpu_first_handle,
            gpu_first_handle: inner.persistent.gpu_first_handle,
            lifetime: KilnDescriptorLifetime::Persistent,
        })
    }

    pub fn free_persistent(
        &self,
        handle: &KilnDescriptorHandle,
    ) -> KilnResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if handle.lifetime != KilnDescriptorLifetime::Persistent
            || handle.heap != inner.persistent.handle
        {
            return Err(invalid_operation(format!(
                "Descriptor {:?} was not allocated from the persistent {:?} heap",
                handle, self.heap_type
            )));
        }

        if !inner.persistent_slots.free(handle.index) {
            return Err(invalid_operation(format!(
                "Descriptor slot {} of the {:?} heap was freed while not allocated",
                handle.index, self.heap_type
            )));
        }

        Ok(())
    }

    /// Allocate `count` consecutive transient slots. If the active linear heap had to be replaced,
    /// the old heap is returned and must be released once the GPU is done with it.
    pub fn allocate_linear(
        &self,
        count: u32,
    ) -> KilnResult<(KilnDescriptorHandle, Option<KilnNativeHandle>)> {
        if count == 0 || count > self.linear_size {
            return Err(invalid_operation(format!(
                "Can't allocate {} linear descriptors from {:?} heaps of size {}",
                count, self.heap_type, self.linear_size
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return Err(KilnError::DeviceDestroyed);
        }

        let (mut linear, retired) = match inner.linear.take() {
            Some(linear) if self.linear_size - linear.allocated >= count => (linear, None),
            old => {
                let native = match self.backend.create_descriptor_heap(
                    self.heap_type,
                    self.linear_size,
                    self.shader_visible,
                ) {
                    Ok(native) => native,
                    Err(e) => {
                        inner.linear = old;
                        return Err(e);
                    }
                };

                let generation = inner.next_generation;
                inner.next_generation += 1;

                log::debug!(
                    "Installing linear {:?} heap generation {} (shader visible: {})",
                    self.heap_type,
                    generation,
                    self.shader_visible
                );

                let linear = KilnLinearHeap {
                    native,
                    allocated: 0,
                    generation,
                };
                (linear, old.map(|x| x.native.handle))
            }
        };

        let handle = KilnDescriptorHandle {
            heap_type: self.heap_type,
            shader_visible: self.shader_visible,
            heap: linear.native.handle,
            index: linear.allocated,
            count,
            increment: self.increment,
            cpu_first_handle: linear.native.cpu_first_handle,
            gpu_first_handle: linear.native.gpu_first_handle,
            lifetime: KilnDescriptorLifetime::Linear {
                generation: linear.generation,
            },
        };

        linear.allocated += count;
        inner.linear = Some(linear);

        Ok((handle, retired))
    }

    /// False once the linear heap that produced the handle has been replaced
    pub fn is_linear_handle_current(
        &self,
        handle: &KilnDescriptorHandle,
    ) -> bool {
        let inner = self.inner.lock().unwrap();
        match (handle.lifetime, &inner.linear) {
            (KilnDescriptorLifetime::Linear { generation }, Some(linear)) => {
                linear.generation == generation && linear.native.handle == handle.heap
            }
            _ => false,
        }
    }

    /// Release the native heaps. The GPU must be idle.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return;
        }

        inner.destroyed = true;
        let leaked = inner.persistent_slots.allocated_count();
        if leaked > 0 {
            log::warn!(
                "{} persistent {:?} descriptors (shader visible: {}) still allocated at teardown",
                leaked,
                self.heap_type,
                self.shader_visible
            );
        }

        release_heap(&*self.backend, inner.persistent.handle);
        if let Some(linear) = inner.linear.take() {
            release_heap(&*self.backend, linear.native.handle);
        }
    }
}

fn release_heap(
    backend: &dyn KilnBackend,
    heap: KilnNativeHandle,
) {
    let remaining = backend.release(heap);
    if remaining != 0 {
        log::warn!(
            "Descriptor heap {:?} still has {} references after release",
            heap,
            remaining
        );
    }
}

// Every (type, visibility) pair a device uses. Rtv and Dsv heaps are never shader visible.
const HEAP_LAYOUT: [(KilnDescriptorHeapType, bool); 6] = [
    (KilnDescriptorHeapType::CbvSrvUav, false),
    (KilnDescriptorHeapType::Sampler, false),
    (KilnDescriptorHeapType::Rtv, false),
    (KilnDescriptorHeapType::Dsv, false),
    (KilnDescriptorHeapType::CbvSrvUav, true),
    (KilnDescriptorHeapType::Sampler, true),
];

/// One heap for every (type, visibility) pair a device uses
pub(crate) struct KilnDescriptorHeapSet {
    // Same order as HEAP_LAYOUT
    heaps: Vec<KilnDescriptorHeap>,
}

impl KilnDescriptorHeapSet {
    pub fn new(
        backend: &Arc<dyn KilnBackend>,
        device_info: &KilnDeviceInfo,
        api_def: &KilnApiDef,
    ) -> KilnResult<Self> {
        let create_heap = |heap_type: KilnDescriptorHeapType, shader_visible: bool| {
            let mut persistent_count = api_def.persistent_descriptor_counts.get(heap_type);
            let mut linear_size = api_def.linear_descriptor_counts.get(heap_type);

            if shader_visible {
                let limit = match heap_type {
                    KilnDescriptorHeapType::Sampler => {
                        device_info.max_shader_visible_sampler_descriptors
                    }
                    _ => device_info.max_shader_visible_view_descriptors,
                };

                if linear_size > limit {
                    log::debug!(
                        "Clamping shader-visible linear {:?} heap size {} to device limit {}",
                        heap_type,
                        linear_size,
                        limit
                    );
                    linear_size = limit;
                }

                persistent_count = persistent_count.min(limit);
            }

            KilnDescriptorHeap::new(
                backend.clone(),
                heap_type,
                shader_visible,
                persistent_count,
                linear_size,
            )
        };

        let mut heaps = Vec::with_capacity(HEAP_LAYOUT.len());
        for &(heap_type, shader_visible) in HEAP_LAYOUT.iter() {
            match create_heap(heap_type, shader_visible) {
                Ok(heap) => heaps.push(heap),
                Err(e) => {
                    // Nothing else owns the heaps created so far
                    for heap in &heaps {
                        heap.destroy();
                    }
                    return Err(e);
                }
            }
        }

        Ok(KilnDescriptorHeapSet { heaps })
    }

    pub fn heap(
        &self,
        heap_type: KilnDescriptorHeapType,
        shader_visible: bool,
    ) -> KilnResult<&KilnDescriptorHeap> {
        HEAP_LAYOUT
            .iter()
            .position(|&x| x == (heap_type, shader_visible))
            .map(|index| &self.heaps[index])
            .ok_or_else(|| {
                invalid_operation(format!("{:?} heaps can't be shader visible", heap_type))
            })
    }

    /// The heap a handle was allocated from
    pub fn heap_for_handle(
        &self,
        handle: &KilnDescriptorHandle,
    ) -> KilnResult<&KilnDescriptorHeap> {
        self.heap(handle.heap_type, handle.shader_visible)
    }

    pub fn destroy(&self) {
        for heap in &self.heaps {
            heap.destroy();
        }
    }
}
