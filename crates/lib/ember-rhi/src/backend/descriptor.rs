use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::RhiError;
use super::resource::Format;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DescriptorHeapKind {
    /// Shader-visible heap holding shader-resource and unordered-access views.
    GpuVisible,
    RenderTarget,
    DepthStencil,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ViewKind {
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

/// The view currently written into a descriptor slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ViewRecord {
    pub resource: u64,
    pub kind: ViewKind,
    pub format: Format,
}

/// A single descriptor slot within a heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Descriptor {
    pub heap: u64,
    pub index: u32,
}

/// A contiguous run of descriptor slots handed out by a sub-heap.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DescriptorRange {
    pub heap: u64,
    pub start: u32,
    pub count: u32,
}

impl DescriptorRange {
    pub fn descriptor(&self, offset: u32) -> Descriptor {
        debug_assert!(offset < self.count);
        Descriptor {
            heap: self.heap,
            index: self.start + offset,
        }
    }
}

/// A top-level descriptor heap. Created once by the caller and partitioned
/// into sub-heaps; the render-graph core never creates heaps on its own.
pub struct DescriptorHeap {
    id: u64,
    kind: DescriptorHeapKind,
    capacity: u32,
    views: Mutex<HashMap<u32, ViewRecord>>,
}

impl DescriptorHeap {
    pub(crate) fn new(id: u64, kind: DescriptorHeapKind, capacity: u32) -> Self {
        Self {
            id,
            kind,
            capacity,
            views: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Write a view into a slot, replacing whatever was there.
    pub fn write_view(&self, descriptor: Descriptor, record: ViewRecord) {
        debug_assert_eq!(descriptor.heap, self.id);
        debug_assert!(descriptor.index < self.capacity);
        self.views.lock().insert(descriptor.index, record);
    }

    pub fn view_at(&self, descriptor: Descriptor) -> Option<ViewRecord> {
        debug_assert_eq!(descriptor.heap, self.id);
        self.views.lock().get(&descriptor.index).copied()
    }
}

/// A caller-partitioned slice of a descriptor heap with its own free list.
///
/// Ranges are handed out first-fit and coalesced on free. Thread-safe: ranges
/// are freed by the deferred releaser while workers may be allocating
/// per-execute scratch ranges.
pub struct DescriptorSubHeap {
    heap: Arc<DescriptorHeap>,
    start: u32,
    capacity: u32,
    /// Sorted, disjoint (offset, count) runs relative to `start`.
    free: Mutex<Vec<(u32, u32)>>,
}

impl DescriptorSubHeap {
    pub fn new(heap: Arc<DescriptorHeap>, start: u32, capacity: u32) -> Arc<Self> {
        assert!(start + capacity <= heap.capacity());
        Arc::new(Self {
            heap,
            start,
            capacity,
            free: Mutex::new(vec![(0, capacity)]),
        })
    }

    pub fn heap(&self) -> &Arc<DescriptorHeap> {
        &self.heap
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn allocated_count(&self) -> u32 {
        let free: u32 = self.free.lock().iter().map(|(_, count)| count).sum();
        self.capacity - free
    }

    pub fn allocate_range(&self, count: u32) -> Result<DescriptorRange, RhiError> {
        if count == 0 {
            return Ok(DescriptorRange {
                heap: self.heap.id(),
                start: self.start,
                count: 0,
            });
        }

        let mut free = self.free.lock();

        let slot = free.iter().position(|(_, run)| *run >= count);
        match slot {
            Some(idx) => {
                let (offset, run) = free[idx];
                if run == count {
                    free.remove(idx);
                } else {
                    free[idx] = (offset + count, run - count);
                }
                Ok(DescriptorRange {
                    heap: self.heap.id(),
                    start: self.start + offset,
                    count,
                })
            }
            None => Err(RhiError::OutOfDescriptors {
                requested: count,
                available: free.iter().map(|(_, run)| *run).max().unwrap_or(0),
            }),
        }
    }

    pub fn free_range(&self, range: DescriptorRange) -> Result<(), RhiError> {
        if range.count == 0 {
            return Ok(());
        }
        if range.heap != self.heap.id()
            || range.start < self.start
            || range.start + range.count > self.start + self.capacity
        {
            return Err(RhiError::ForeignDescriptorRange);
        }

        let offset = range.start - self.start;
        let mut free = self.free.lock();

        let idx = free.partition_point(|(run_offset, _)| *run_offset < offset);
        free.insert(idx, (offset, range.count));

        // coalesce with right then left neighbor
        if idx + 1 < free.len() && free[idx].0 + free[idx].1 == free[idx + 1].0 {
            free[idx].1 += free[idx + 1].1;
            free.remove(idx + 1);
        }
        if idx > 0 && free[idx - 1].0 + free[idx - 1].1 == free[idx].0 {
            free[idx - 1].1 += free[idx].1;
            free.remove(idx);
        }
        Ok(())
    }

    pub fn write_view(&self, descriptor: Descriptor, record: ViewRecord) {
        self.heap.write_view(descriptor, record);
    }

    pub fn view_at(&self, descriptor: Descriptor) -> Option<ViewRecord> {
        self.heap.view_at(descriptor)
    }
}
