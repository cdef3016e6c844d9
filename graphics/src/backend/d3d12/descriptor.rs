//! CPU descriptors for views and samplers the layer creates itself.
//!
//! Application views live in the application's descriptor heaps. Views
//! created through the abstract interface need a descriptor of their own,
//! which comes from small CPU-only heaps the layer grows on demand.

use super::conversion::DescriptorHeapKind;
use super::driver::D3D12Driver;
use crate::backend::com::{ComPtr, HResult};

/// Descriptors per layer-owned heap.
pub const DESCRIPTORS_PER_HEAP: u32 = 64;

#[derive(Debug, Clone, Copy)]
struct Heap {
    heap: ComPtr,
    base: u64,
}

/// Free-list allocator over the heaps of one descriptor type.
#[derive(Debug)]
pub struct DescriptorAllocator {
    kind: DescriptorHeapKind,
    heaps: Vec<Heap>,
    /// Descriptors handed out from the last heap.
    used: u32,
    free: Vec<u64>,
}

impl DescriptorAllocator {
    pub fn new(kind: DescriptorHeapKind) -> Self {
        Self {
            kind,
            heaps: Vec::new(),
            used: DESCRIPTORS_PER_HEAP,
            free: Vec::new(),
        }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn allocate(&mut self, driver: &dyn D3D12Driver) -> Result<u64, HResult> {
        if let Some(handle) = self.free.pop() {
            return Ok(handle);
        }
        if self.used == DESCRIPTORS_PER_HEAP {
            let (heap, base) = driver.create_descriptor_heap(self.kind, DESCRIPTORS_PER_HEAP)?;
            log::trace!(
                "DescriptorAllocator: new {:?} heap {:#x} at {:#x}",
                self.kind,
                heap.raw(),
                base
            );
            self.heaps.push(Heap { heap, base });
            self.used = 0;
        }
        let increment = u64::from(driver.descriptor_increment(self.kind));
        let base = self.heaps.last().map_or(0, |heap| heap.base);
        let handle = base + u64::from(self.used) * increment;
        self.used += 1;
        Ok(handle)
    }

    pub fn free(&mut self, handle: u64) {
        debug_assert!(!self.free.contains(&handle), "descriptor freed twice");
        self.free.push(handle);
    }

    /// Whether `handle` lies in one of the layer's heaps.
    pub fn owns(&self, handle: u64, increment: u32) -> bool {
        let size = u64::from(DESCRIPTORS_PER_HEAP) * u64::from(increment);
        self.heaps
            .iter()
            .any(|heap| handle >= heap.base && handle < heap.base + size)
    }

    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }

    /// Release every heap. Descriptors handed out become invalid.
    pub fn release(&mut self, driver: &dyn D3D12Driver) {
        for heap in self.heaps.drain(..) {
            driver.release(heap.heap);
        }
        self.free.clear();
        self.used = DESCRIPTORS_PER_HEAP;
    }
}

/// One allocator per descriptor type.
#[derive(Debug)]
pub struct DescriptorHeaps {
    cbv_srv_uav: DescriptorAllocator,
    sampler: DescriptorAllocator,
    rtv: DescriptorAllocator,
    dsv: DescriptorAllocator,
}

impl Default for DescriptorHeaps {
    fn default() -> Self {
        Self {
            cbv_srv_uav: DescriptorAllocator::new(DescriptorHeapKind::CbvSrvUav),
            sampler: DescriptorAllocator::new(DescriptorHeapKind::Sampler),
            rtv: DescriptorAllocator::new(DescriptorHeapKind::Rtv),
            dsv: DescriptorAllocator::new(DescriptorHeapKind::Dsv),
        }
    }
}

impl DescriptorHeaps {
    pub fn get_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorAllocator {
        match kind {
            DescriptorHeapKind::CbvSrvUav => &mut self.cbv_srv_uav,
            DescriptorHeapKind::Sampler => &mut self.sampler,
            DescriptorHeapKind::Rtv => &mut self.rtv,
            DescriptorHeapKind::Dsv => &mut self.dsv,
        }
    }

    pub fn release(&mut self, driver: &dyn D3D12Driver) {
        self.cbv_srv_uav.release(driver);
        self.sampler.release(driver);
        self.rtv.release(driver);
        self.dsv.release(driver);
    }
}
