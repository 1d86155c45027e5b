mod graph;
mod compiler;
mod graph_data;

mod graph_resource;
mod pass;

mod allocator;
mod releaser;
mod executer;

mod error;

pub use graph::{FrameGraph, FrameGraphDesc};
pub use compiler::FrameGraphCompiler;
pub use graph_data::{FrameGraphData, GraphSubHeaps, PassContext, RegisteredResource};
pub use graph_resource::{
    DepthStencilBinding, PassIndex, RenderTargetBinding, ResourceIndex, ViewDesc,
};
pub use pass::{PassBuilder, PassFn, PassSubmission};
pub use allocator::ResourceAllocator;
pub use releaser::{ReleasePayload, ResourceReleaser};
pub use executer::FrameGraphExecuter;
pub use error::GraphError;

extern crate log as glog;
