use super::resource::ResourceStates;

/// One entry of a batched `resource_barrier` call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Barrier {
    /// State transition of a whole resource.
    Transition {
        resource: u64,
        before: ResourceStates,
        after: ResourceStates,
    },
    /// Orders back-to-back unordered-access work on the same resource; the
    /// state model alone cannot express a UAV write/read dependency.
    UnorderedAccess { resource: u64 },
}

impl Barrier {
    pub fn transition(resource: u64, before: ResourceStates, after: ResourceStates) -> Self {
        Barrier::Transition {
            resource,
            before,
            after,
        }
    }

    pub fn unordered_access(resource: u64) -> Self {
        Barrier::UnorderedAccess { resource }
    }

    pub fn resource(&self) -> u64 {
        match self {
            Barrier::Transition { resource, .. } => *resource,
            Barrier::UnorderedAccess { resource } => *resource,
        }
    }
}
