use std::sync::Arc;
use std::time::Duration;

use ember_rhi::backend::{
    CommandQueue, Device, Fence, Resource, ResourceDesc, ResourceStates,
};

use crate::allocator::ResourceAllocator;
use crate::compiler::FrameGraphCompiler;
use crate::error::GraphError;
use crate::executer::FrameGraphExecuter;
use crate::graph_data::{FrameGraphData, GraphSubHeaps};
use crate::graph_resource::ResourceIndex;
use crate::pass::PassBuilder;
use crate::releaser::ResourceReleaser;

/// Construction parameters of a [`FrameGraph`].
pub struct FrameGraphDesc {
    /// Descriptor sub-heaps the graph carves its ranges from.
    pub heaps: GraphSubHeaps,
    /// Worker threads recording command lists per execution.
    pub worker_count: usize,
    /// CPU frames allowed in flight before `begin_frame` blocks.
    pub in_flight_frames: usize,
    /// How long `begin_frame` waits on the pacing fence before reporting a
    /// lost device.
    pub frame_wait_timeout: Duration,
}

impl FrameGraphDesc {
    pub fn new(heaps: GraphSubHeaps) -> Self {
        Self {
            heaps,
            worker_count: 4,
            in_flight_frames: 2,
            frame_wait_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_in_flight_frames(mut self, in_flight_frames: usize) -> Self {
        self.in_flight_frames = in_flight_frames.max(1);
        self
    }
}

/// Owner of the whole render-graph runtime: compiler, pooled allocator, the
/// two releasers, and the multi-threaded executer, behind one façade.
///
/// Lifecycle: `new_graph` starts a declaration generation, `compile` freezes
/// it into an executable plan, then any number of `begin_frame` / `execute` /
/// `end_frame` cycles replay it. A later `new_graph` retires the old plan
/// through the graph-scoped releaser, so its transients return to the pool
/// only once the GPU is provably done with them.
pub struct FrameGraph {
    device: Device,
    queue: Arc<CommandQueue>,
    heaps: GraphSubHeaps,
    allocator: ResourceAllocator,
    /// Holds compile-time allocations (transients, view ranges) of retired
    /// generations. Release points only at restart and shutdown.
    graph_releaser: ResourceReleaser,
    /// Holds per-execute scratch descriptor ranges. Release point every
    /// `end_frame`.
    frame_releaser: ResourceReleaser,
    executer: FrameGraphExecuter,
    compiler: Option<FrameGraphCompiler>,
    data: Option<FrameGraphData>,
    next_generation: u32,
    frame_fence: Fence,
    /// Fence value signalled when each in-flight slot last ended a frame.
    frame_values: Vec<u64>,
    next_frame_value: u64,
    frame_index: usize,
    frame_wait_timeout: Duration,
}

impl FrameGraph {
    pub fn new(device: &Device, queue: Arc<CommandQueue>, desc: FrameGraphDesc) -> Self {
        let in_flight_frames = desc.in_flight_frames.max(1);
        Self {
            executer: FrameGraphExecuter::new(
                device,
                queue.clone(),
                desc.worker_count,
                in_flight_frames,
            ),
            allocator: ResourceAllocator::new(device.clone()),
            graph_releaser: ResourceReleaser::new(device),
            frame_releaser: ResourceReleaser::new(device),
            frame_fence: device.create_fence(0),
            frame_values: vec![0; in_flight_frames],
            next_frame_value: 1,
            frame_index: 0,
            heaps: desc.heaps,
            frame_wait_timeout: desc.frame_wait_timeout,
            compiler: None,
            data: None,
            next_generation: 0,
            device: device.clone(),
            queue,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Transient resources currently parked in the allocator pool.
    pub fn pooled_resource_count(&self) -> usize {
        self.allocator.pooled_count()
    }

    /// Start declaring a new graph generation, retiring the previous compiled
    /// plan (if any) through the graph-scoped releaser.
    pub fn new_graph(&mut self) -> u32 {
        if let Some(data) = self.data.take() {
            glog::debug!("retiring graph generation {}", data.generation());
            data.retire(&self.graph_releaser);
            self.graph_releaser.add_release_point(&self.queue);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.compiler = Some(FrameGraphCompiler::new(generation));
        generation
    }

    pub fn add_internal_resource(
        &mut self,
        name: impl Into<String>,
        desc: ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<ResourceIndex, GraphError> {
        let compiler = self.compiler.as_mut().ok_or(GraphError::NoGraphInProgress)?;
        Ok(compiler.add_internal_resource(name, desc, initial_state))
    }

    pub fn add_external_resource(
        &mut self,
        name: impl Into<String>,
        handle: Option<Arc<Resource>>,
        initial_state: ResourceStates,
        final_state: ResourceStates,
    ) -> Result<ResourceIndex, GraphError> {
        let compiler = self.compiler.as_mut().ok_or(GraphError::NoGraphInProgress)?;
        Ok(compiler.add_external_resource(name, handle, initial_state, final_state))
    }

    pub fn add_pass(&mut self, name: &str) -> Result<PassBuilder<'_>, GraphError> {
        let compiler = self.compiler.as_mut().ok_or(GraphError::NoGraphInProgress)?;
        Ok(compiler.add_pass(name))
    }

    /// Freeze the in-progress declaration into an executable plan.
    pub fn compile(&mut self) -> Result<(), GraphError> {
        let compiler = self.compiler.take().ok_or(GraphError::NoGraphInProgress)?;

        // reclaim whatever earlier generations have finished with, so the
        // allocator pool is as warm as possible before allocating
        self.graph_releaser.collect(&mut self.allocator);

        let data = compiler.compile(&mut self.allocator, &self.heaps)?;
        self.data = Some(data);
        Ok(())
    }

    pub fn compiled(&self) -> Option<&FrameGraphData> {
        self.data.as_ref()
    }

    /// Rebind an external resource of the compiled plan, e.g. the swap-chain
    /// image of the upcoming frame. No recompilation needed.
    pub fn set_external_resource(
        &mut self,
        index: ResourceIndex,
        handle: Arc<Resource>,
    ) -> Result<(), GraphError> {
        self.data
            .as_mut()
            .ok_or(GraphError::NotCompiled)?
            .set_external_resource(index, handle)
    }

    /// Block until the in-flight slot for this frame is free, then reclaim
    /// its allocators and any completed deferred releases.
    pub fn begin_frame(&mut self) -> Result<(), GraphError> {
        self.frame_fence
            .wait_timeout(self.frame_values[self.frame_index], self.frame_wait_timeout)?;

        self.executer.reset_frame(self.frame_index);
        self.frame_releaser.collect(&mut self.allocator);
        self.graph_releaser.collect(&mut self.allocator);
        Ok(())
    }

    /// Record and submit the compiled plan once.
    pub fn execute(&mut self) -> Result<(), GraphError> {
        let data = self.data.as_ref().ok_or(GraphError::NotCompiled)?;
        self.executer
            .execute(data, self.frame_index, &self.frame_releaser)
    }

    /// Stamp the frame's release point and advance the in-flight slot.
    pub fn end_frame(&mut self) {
        self.frame_releaser.add_release_point(&self.queue);

        let value = self.next_frame_value;
        self.next_frame_value += 1;
        self.queue.signal(&self.frame_fence, value);
        self.frame_values[self.frame_index] = value;
        self.frame_index = (self.frame_index + 1) % self.frame_values.len();
    }
}

impl Drop for FrameGraph {
    /// Retire the live plan and stamp final release points so both releasers
    /// can drain instead of waiting on fence values that will never come.
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            data.retire(&self.graph_releaser);
        }
        self.graph_releaser.add_release_point(&self.queue);
        self.frame_releaser.add_release_point(&self.queue);
    }
}
