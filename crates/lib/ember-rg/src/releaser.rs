use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ember_rhi::backend::{
    CommandQueue, DescriptorHeap, DescriptorRange, DescriptorSubHeap, Device, Fence, Resource,
    ResourceStates,
};

use crate::allocator::ResourceAllocator;

/// Upper bound on the shutdown drain. A fence that never advances past this
/// means the device is gone; leaking is better than hanging the destructor.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with a record once its fence value is proven complete.
pub enum ReleasePayload {
    /// Return a transient resource to the allocator pool, tagged with the
    /// state it was left in.
    Pooled {
        resource: Resource,
        state: ResourceStates,
    },
    /// Drop a reference to a caller-owned resource.
    Handle(Arc<Resource>),
    /// Free a descriptor range back to its sub-heap.
    DescriptorRange {
        sub_heap: Arc<DescriptorSubHeap>,
        range: DescriptorRange,
    },
    /// Destroy a whole descriptor heap.
    DescriptorHeap(Arc<DescriptorHeap>),
}

struct ReleaseRecord {
    /// Fence value that must complete before this record may be released:
    /// the value of the *next* release point signalled after enqueue.
    value: u64,
    payload: ReleasePayload,
}

/// Defers release of fenced resources until the GPU provably no longer uses
/// them.
///
/// A record enqueued between release points N and N+1 becomes releasable only
/// once the fence reports N+1 complete; the point in effect at enqueue time
/// is not enough, since the GPU may still be inside work submitted after it.
pub struct ResourceReleaser {
    fence: Fence,
    /// Value the next `add_release_point` call will signal.
    next_value: AtomicU64,
    pending: Mutex<Vec<ReleaseRecord>>,
}

impl ResourceReleaser {
    pub fn new(device: &Device) -> Self {
        Self {
            fence: device.create_fence(0),
            next_value: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a record. Thread-safe: pass callbacks add per-execute scratch
    /// ranges from worker threads.
    pub fn add(&self, payload: ReleasePayload) {
        let value = self.next_value.load(Ordering::Acquire);
        self.pending.lock().push(ReleaseRecord { value, payload });
    }

    /// Stamp the next release point by signalling the queue and advancing the
    /// internal counter.
    pub fn add_release_point(&self, queue: &CommandQueue) {
        let value = self.next_value.fetch_add(1, Ordering::AcqRel);
        queue.signal(&self.fence, value);
    }

    /// Release every record whose fence value has completed.
    pub fn collect(&self, allocator: &mut ResourceAllocator) {
        let completed = self.fence.completed_value();

        let ready: Vec<ReleaseRecord> = {
            let mut pending = self.pending.lock();
            let (ready, rest) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|record| record.value <= completed);
            *pending = rest;
            ready
        };

        for record in ready {
            match record.payload {
                ReleasePayload::Pooled { resource, state } => allocator.free(resource, state),
                ReleasePayload::Handle(handle) => drop(handle),
                ReleasePayload::DescriptorRange { sub_heap, range } => {
                    if let Err(err) = sub_heap.free_range(range) {
                        glog::error!("failed to free deferred descriptor range: {}", err);
                    }
                }
                ReleasePayload::DescriptorHeap(heap) => drop(heap),
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for ResourceReleaser {
    /// Block until every pending record's fence value is reached, then let
    /// the records drop. The owner is expected to have signalled a final
    /// release point; pooling is pointless at teardown, so resources are
    /// destroyed rather than returned.
    fn drop(&mut self) {
        let pending = self.pending.get_mut();
        let Some(max_value) = pending.iter().map(|record| record.value).max() else {
            return;
        };

        if let Err(err) = self.fence.wait_timeout(max_value, DRAIN_TIMEOUT) {
            glog::error!(
                "releaser drain timed out, leaking {} records: {}",
                pending.len(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_rhi::backend::{DeviceDesc, Format, ResourceDesc};

    fn fixture() -> (Device, CommandQueue, ResourceAllocator, ResourceReleaser) {
        let device = Device::new(DeviceDesc::default());
        let queue = CommandQueue::new();
        let allocator = ResourceAllocator::new(device.clone());
        let releaser = ResourceReleaser::new(&device);
        (device, queue, allocator, releaser)
    }

    fn pooled(device: &Device) -> ReleasePayload {
        let desc = ResourceDesc::tex2d(16, 16, Format::Rgba8Unorm);
        let resource = device.create_resource(desc, ResourceStates::COMMON).unwrap();
        ReleasePayload::Pooled {
            resource,
            state: ResourceStates::COMMON,
        }
    }

    #[test]
    fn record_waits_for_the_next_point_after_enqueue() {
        let (device, queue, mut allocator, releaser) = fixture();

        // point V = 1 completes, then the record is enqueued
        releaser.add_release_point(&queue);
        releaser.add(pooled(&device));

        // completed value is still V; the record needs V+1
        releaser.collect(&mut allocator);
        assert_eq!(releaser.pending_count(), 1);
        assert_eq!(allocator.pooled_count(), 0);

        releaser.add_release_point(&queue);
        releaser.collect(&mut allocator);
        assert_eq!(releaser.pending_count(), 0);
        assert_eq!(allocator.pooled_count(), 1);
    }

    #[test]
    fn record_without_any_point_is_never_released() {
        let (device, _queue, mut allocator, releaser) = fixture();

        releaser.add(pooled(&device));
        releaser.collect(&mut allocator);
        assert_eq!(releaser.pending_count(), 1);

        // avoid the drain timeout in this intentionally unsignalled case
        releaser.pending.lock().clear();
    }

    #[test]
    fn owned_heaps_are_destroyed_once_their_fence_value_completes() {
        let (device, queue, mut allocator, releaser) = fixture();

        let heap = device.create_descriptor_heap(
            ember_rhi::backend::DescriptorHeapKind::GpuVisible,
            8,
        );
        let weak = Arc::downgrade(&heap);

        releaser.add(ReleasePayload::DescriptorHeap(heap));
        releaser.add_release_point(&queue);
        releaser.collect(&mut allocator);

        assert_eq!(releaser.pending_count(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn descriptor_ranges_return_to_their_sub_heap() {
        let (device, queue, mut allocator, releaser) = fixture();

        let heap = device.create_descriptor_heap(
            ember_rhi::backend::DescriptorHeapKind::GpuVisible,
            16,
        );
        let sub_heap = DescriptorSubHeap::new(heap, 0, 16);
        let range = sub_heap.allocate_range(4).unwrap();
        assert_eq!(sub_heap.allocated_count(), 4);

        releaser.add(ReleasePayload::DescriptorRange {
            sub_heap: sub_heap.clone(),
            range,
        });
        releaser.add_release_point(&queue);
        releaser.collect(&mut allocator);
        assert_eq!(sub_heap.allocated_count(), 0);
    }
}
