mod device;
mod resource;
mod descriptor;
mod command;
mod queue;
mod fence;
mod pipeline;
mod error;

pub mod barrier;

pub use device::{Device, DeviceDesc};
pub use resource::{
    Resource, ResourceDesc, ResourceFlags, ResourceStates, Format, ClearValue,
};
pub use descriptor::{
    Descriptor, DescriptorHeap, DescriptorHeapKind, DescriptorRange, DescriptorSubHeap, ViewKind,
    ViewRecord,
};
pub use command::{Command, CommandAllocator, CommandList};
pub use queue::{CommandQueue, Submission};
pub use fence::Fence;
pub use pipeline::{PipelineKind, PipelineState, Rect, Viewport};
pub use error::RhiError;
