use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::command::{CommandAllocator, CommandList};
use super::descriptor::{DescriptorHeap, DescriptorHeapKind};
use super::error::RhiError;
use super::fence::Fence;
use super::pipeline::{PipelineKind, PipelineState};
use super::resource::{Resource, ResourceDesc, ResourceStates};

/// Device creation parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceDesc {
    /// Upper bound on live resource memory. `None` means unbounded.
    pub memory_budget_bytes: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct DeviceInner {
    desc: DeviceDesc,
    next_id: AtomicU64,
    live_bytes: AtomicU64,
    /// Number of fresh resource allocations ever made (reuse excluded).
    creation_count: AtomicU64,
}

impl DeviceInner {
    pub(crate) fn on_resource_destroyed(&self, bytes: u64) {
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// The one GPU device of the process.
///
/// Cheap to clone; all clones refer to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(desc: DeviceDesc) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                desc,
                next_id: AtomicU64::new(1),
                live_bytes: AtomicU64::new(0),
                creation_count: AtomicU64::new(0),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a fresh resource in `initial_state`.
    ///
    /// The initial state is a property of the caller's contract with the GPU,
    /// not of the allocation itself; it is echoed back by pooled allocators.
    pub fn create_resource(
        &self,
        desc: ResourceDesc,
        _initial_state: ResourceStates,
    ) -> Result<Resource, RhiError> {
        let bytes = desc.approximate_size_bytes();

        if let Some(budget) = self.inner.desc.memory_budget_bytes {
            let live = self.inner.live_bytes.load(Ordering::Relaxed);
            if live + bytes > budget {
                return Err(RhiError::OutOfDeviceMemory {
                    requested_bytes: bytes,
                    available_bytes: budget.saturating_sub(live),
                });
            }
        }

        self.inner.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.inner.creation_count.fetch_add(1, Ordering::Relaxed);

        let id = self.next_id();
        glog::trace!("created resource {} ({} bytes)", id, bytes);

        Ok(Resource {
            id,
            desc,
            device: self.inner.clone(),
        })
    }

    pub fn create_fence(&self, initial_value: u64) -> Fence {
        Fence::new(initial_value)
    }

    pub fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
    ) -> Arc<DescriptorHeap> {
        Arc::new(DescriptorHeap::new(self.next_id(), kind, capacity))
    }

    pub fn create_command_allocator(&self) -> CommandAllocator {
        CommandAllocator::new(self.next_id())
    }

    pub fn create_command_list(&self) -> CommandList {
        CommandList::new(self.next_id())
    }

    pub fn create_pipeline_state(&self, kind: PipelineKind) -> PipelineState {
        let id = self.next_id();
        PipelineState {
            id,
            // every pipeline owns its root signature in this model
            root_signature: id,
            kind,
        }
    }

    /// Total fresh allocations made so far. Pooled reuse does not count.
    pub fn resource_creation_count(&self) -> u64 {
        self.inner.creation_count.load(Ordering::Relaxed)
    }

    pub fn live_resource_bytes(&self) -> u64 {
        self.inner.live_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Format;

    #[test]
    fn memory_budget_is_enforced_and_returned_on_drop() {
        let device = Device::new(DeviceDesc {
            memory_budget_bytes: Some(4 * 64 * 64 + 16),
        });

        let desc = ResourceDesc::tex2d(64, 64, Format::Rgba8Unorm);
        let res = device.create_resource(desc, ResourceStates::COMMON).unwrap();

        let err = device
            .create_resource(desc, ResourceStates::COMMON)
            .unwrap_err();
        assert!(matches!(err, RhiError::OutOfDeviceMemory { .. }));

        drop(res);
        device.create_resource(desc, ResourceStates::COMMON).unwrap();
    }

    #[test]
    fn resource_ids_are_unique() {
        let device = Device::new(DeviceDesc::default());
        let desc = ResourceDesc::tex2d(4, 4, Format::Rgba8Unorm);

        let a = device.create_resource(desc, ResourceStates::COMMON).unwrap();
        let b = device.create_resource(desc, ResourceStates::COMMON).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(device.resource_creation_count(), 2);
    }
}
