use std::collections::HashMap;

use ember_rhi::backend::{Device, Resource, ResourceDesc, ResourceStates, RhiError};

/// Pooled allocator for transient GPU resources.
///
/// Resources are keyed by their byte-exact structural description. Freeing
/// does not destroy anything and never waits on the GPU; in-flight safety is
/// entirely the releaser's job. Not thread-safe by design: allocation happens
/// on the compiling thread, strictly before any multi-threaded recording.
pub struct ResourceAllocator {
    device: Device,
    unused: HashMap<ResourceDesc, Vec<(Resource, ResourceStates)>>,
}

impl ResourceAllocator {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            unused: HashMap::new(),
        }
    }

    /// Hand out a resource matching `desc` together with its actual initial
    /// state. A pooled resource comes back in whatever state it was freed in,
    /// which may differ from `initial_state`; callers must transition from
    /// the returned state, never from the one they asked for.
    pub fn allocate(
        &mut self,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<(Resource, ResourceStates), RhiError> {
        if let Some(pool) = self.unused.get_mut(desc) {
            if let Some((resource, last_state)) = pool.pop() {
                return Ok((resource, last_state));
            }
        }

        let resource = self.device.create_resource(*desc, initial_state)?;
        Ok((resource, initial_state))
    }

    /// Return a resource to the pool, tagged with the state the caller
    /// asserts it was left in.
    pub fn free(&mut self, resource: Resource, state: ResourceStates) {
        self.unused
            .entry(resource.desc)
            .or_default()
            .push((resource, state));
    }

    pub fn pooled_count(&self) -> usize {
        self.unused.values().map(Vec::len).sum()
    }

    /// Destroy everything in the pool.
    pub fn clean(&mut self) {
        self.unused.clear();
    }
}
