use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::Mutex;

use ember_rhi::backend::barrier::Barrier;
use ember_rhi::backend::{
    CommandList, Descriptor, DescriptorRange, DescriptorSubHeap, Resource, ResourceDesc,
    ResourceStates, RhiError,
};

use crate::compiler::write_view;
use crate::error::GraphError;
use crate::graph_resource::{ResourceIndex, ViewDesc};
use crate::pass::{PassDeclaration, PassFn, PassPipeline, PassSubmission};
use crate::releaser::{ReleasePayload, ResourceReleaser};

/// Recording a transition list in chunks keeps the per-call barrier count
/// bounded, matching what the native API tolerates per batch.
const MAX_BARRIERS_PER_BATCH: usize = 64;

/// The caller-partitioned descriptor sub-heaps one frame graph draws from.
#[derive(Clone)]
pub struct GraphSubHeaps {
    pub gpu_visible: Arc<DescriptorSubHeap>,
    pub render_target: Arc<DescriptorSubHeap>,
    pub depth_stencil: Arc<DescriptorSubHeap>,
}

/// A resource after compilation: transient resources own their allocator
/// backing, externals reference the caller's handle.
pub(crate) enum CompiledResource {
    Transient {
        name: String,
        resource: Resource,
        /// State the resource will be in when it returns to the pool.
        retire_state: ResourceStates,
    },
    External {
        name: String,
        handle: Option<Arc<Resource>>,
        initial_state: ResourceStates,
        final_state: ResourceStates,
    },
}

impl CompiledResource {
    pub(crate) fn try_raw(&self) -> Option<&Resource> {
        match self {
            CompiledResource::Transient { resource, .. } => Some(resource),
            CompiledResource::External { handle, .. } => handle.as_deref(),
        }
    }

    fn raw(&self, slot: u32) -> Result<&Resource, GraphError> {
        self.try_raw()
            .ok_or(GraphError::ExternalResourceNotBound { index: slot })
    }
}

/// The resolved form of one pass usage: which resource, the full transition
/// triple, and the descriptor slot its view lives in.
pub(crate) struct PassResourceEntry {
    pub resource: u32,
    pub before: ResourceStates,
    pub state: ResourceStates,
    pub after: ResourceStates,
    pub view: ViewDesc,
    pub descriptor: Option<Descriptor>,
}

/// What a pass callback may learn about one of its declared resources.
#[derive(Clone, Copy, Debug)]
pub struct RegisteredResource {
    pub id: u64,
    pub desc: ResourceDesc,
    pub current_state: ResourceStates,
    pub descriptor: Option<Descriptor>,
}

/// Context handed to a pass callback during recording. Read access only;
/// callbacks must not mutate graph topology.
pub struct PassContext<'a> {
    /// Command list to record into.
    pub cl: &'a mut CommandList,
    pass: &'a PassNode,
    data: &'a FrameGraphData,
    frame_releaser: &'a ResourceReleaser,
}

impl<'a> PassContext<'a> {
    pub fn get_resource(&self, index: ResourceIndex) -> Result<RegisteredResource, GraphError> {
        if index.generation != self.data.generation {
            return Err(GraphError::StaleResourceIndex {
                index: index.slot,
                index_generation: index.generation,
                current_generation: self.data.generation,
            });
        }

        let entry = self
            .pass
            .entries
            .iter()
            .find(|entry| entry.resource == index.slot)
            .ok_or_else(|| GraphError::UndeclaredResource {
                pass: self.pass.name.clone(),
                index: index.slot,
            })?;

        let raw = self.data.resources[index.slot as usize].raw(index.slot)?;
        Ok(RegisteredResource {
            id: raw.id(),
            desc: raw.desc,
            current_state: entry.state,
            descriptor: entry.descriptor,
        })
    }

    /// Allocate a scratch descriptor range valid for this execution only;
    /// it is reclaimed by the frame-scoped releaser once the frame's fence
    /// point completes.
    pub fn allocate_transient_descriptors(
        &self,
        count: u32,
    ) -> Result<DescriptorRange, RhiError> {
        let range = self.data.heaps.gpu_visible.allocate_range(count)?;
        self.frame_releaser.add(ReleasePayload::DescriptorRange {
            sub_heap: self.data.heaps.gpu_visible.clone(),
            range,
        });
        Ok(range)
    }
}

/// One executable pass of the compiled plan.
pub struct PassNode {
    pub(crate) name: String,
    pipeline: PassPipeline,
    pub(crate) entries: Vec<PassResourceEntry>,
    /// Locked per execution; exactly one worker records a given node.
    callback: Mutex<Option<PassFn>>,
}

impl PassNode {
    pub(crate) fn new(pass: PassDeclaration, entries: Vec<PassResourceEntry>) -> Self {
        Self {
            name: pass.name,
            pipeline: pass.pipeline,
            entries,
            callback: Mutex::new(pass.callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replay one pass into a command list: entry barriers, view rewrite,
    /// output-merger binding and clears, pipeline setup, user callback, exit
    /// barriers. Returns the callback's submission request.
    pub(crate) fn execute(
        &self,
        cl: &mut CommandList,
        data: &FrameGraphData,
        frame_releaser: &ResourceReleaser,
    ) -> Result<PassSubmission, GraphError> {
        // 1. batched entry barriers; identical UAV-to-UAV hand-offs need a
        //    UAV barrier since the state model alone cannot order them
        let mut barriers: ArrayVec<Barrier, MAX_BARRIERS_PER_BATCH> = ArrayVec::new();
        for entry in &self.entries {
            let raw = data.resources[entry.resource as usize].raw(entry.resource)?;
            if entry.before != entry.state {
                barriers.push(Barrier::transition(raw.id(), entry.before, entry.state));
            } else if entry.state.contains(ResourceStates::UNORDERED_ACCESS) {
                barriers.push(Barrier::unordered_access(raw.id()));
            }
            if barriers.is_full() {
                cl.resource_barrier(&barriers);
                barriers.clear();
            }
        }
        cl.resource_barrier(&barriers);

        // 2. rewrite views into the pre-assigned slots; this is what lets a
        //    rebindable external pick up its per-frame handle without any
        //    descriptor allocation
        for entry in &self.entries {
            if let Some(descriptor) = entry.descriptor {
                let raw = data.resources[entry.resource as usize].raw(entry.resource)?;
                write_view(&data.heaps, descriptor, &entry.view, raw);
            }
        }

        // 3. output-merger binding and clear-on-entry, in declaration order
        let render_targets: Vec<Descriptor> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.view {
                ViewDesc::RenderTarget(binding) if binding.bind => entry.descriptor,
                _ => None,
            })
            .collect();
        let depth_stencil = self.entries.iter().find_map(|entry| match entry.view {
            ViewDesc::DepthStencil(binding) if binding.bind => entry.descriptor,
            _ => None,
        });

        if !render_targets.is_empty() || depth_stencil.is_some() {
            cl.set_render_targets(&render_targets, depth_stencil);

            for entry in &self.entries {
                match entry.view {
                    ViewDesc::RenderTarget(binding) => {
                        if let (Some(color), Some(descriptor)) = (binding.clear, entry.descriptor) {
                            cl.clear_render_target(descriptor, color);
                        }
                    }
                    ViewDesc::DepthStencil(binding) => {
                        if let (Some((depth, stencil)), Some(descriptor)) =
                            (binding.clear, entry.descriptor)
                        {
                            cl.clear_depth_stencil(descriptor, depth, stencil);
                        }
                    }
                    _ => {}
                }
            }
        }

        // 4. pipeline, viewport/scissor, flavored root signature
        match &self.pipeline {
            PassPipeline::Graphics {
                pipeline,
                viewport,
                scissor,
            } => {
                cl.set_pipeline_state(pipeline);
                cl.set_viewport(*viewport);
                cl.set_scissor(*scissor);
                cl.set_graphics_root_signature(pipeline.root_signature());
            }
            PassPipeline::Compute { pipeline } => {
                cl.set_pipeline_state(pipeline);
                cl.set_compute_root_signature(pipeline.root_signature());
            }
            PassPipeline::None => {}
        }

        // 5. user callback
        let submission = {
            let mut callback = self.callback.lock();
            match callback.as_mut() {
                Some(callback) => {
                    let mut context = PassContext {
                        cl: &mut *cl,
                        pass: self,
                        data,
                        frame_releaser,
                    };
                    callback(&mut context).map_err(|source| GraphError::PassRecording {
                        pass: self.name.clone(),
                        source,
                    })?
                }
                None => PassSubmission::Batched,
            }
        };

        // 6. batched exit barriers
        let mut barriers: ArrayVec<Barrier, MAX_BARRIERS_PER_BATCH> = ArrayVec::new();
        for entry in &self.entries {
            if entry.state != entry.after {
                let raw = data.resources[entry.resource as usize].raw(entry.resource)?;
                barriers.push(Barrier::transition(raw.id(), entry.state, entry.after));
                if barriers.is_full() {
                    cl.resource_barrier(&barriers);
                    barriers.clear();
                }
            }
        }
        cl.resource_barrier(&barriers);

        Ok(submission)
    }
}

/// The compiled, executable form of one graph generation.
pub struct FrameGraphData {
    pub(crate) generation: u32,
    pub(crate) resources: Vec<CompiledResource>,
    pub(crate) nodes: Vec<PassNode>,
    pub(crate) heaps: GraphSubHeaps,
    gpu_range: DescriptorRange,
    rtv_range: DescriptorRange,
    dsv_range: DescriptorRange,
}

impl FrameGraphData {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        generation: u32,
        resources: Vec<CompiledResource>,
        nodes: Vec<PassNode>,
        heaps: GraphSubHeaps,
        gpu_range: DescriptorRange,
        rtv_range: DescriptorRange,
        dsv_range: DescriptorRange,
    ) -> Self {
        Self {
            generation,
            resources,
            nodes,
            heaps,
            gpu_range,
            rtv_range,
            dsv_range,
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn gpu_visible_descriptor_count(&self) -> u32 {
        self.gpu_range.count
    }

    pub fn render_target_descriptor_count(&self) -> u32 {
        self.rtv_range.count
    }

    pub fn depth_stencil_descriptor_count(&self) -> u32 {
        self.dsv_range.count
    }

    /// Rebind an external resource to a new caller-owned handle. Valid
    /// between frames; the graph does not need recompiling.
    pub fn set_external_resource(
        &mut self,
        index: ResourceIndex,
        new_handle: Arc<Resource>,
    ) -> Result<(), GraphError> {
        if index.generation != self.generation {
            return Err(GraphError::StaleResourceIndex {
                index: index.slot,
                index_generation: index.generation,
                current_generation: self.generation,
            });
        }
        let slot = index.slot as usize;
        match self.resources.get_mut(slot) {
            Some(CompiledResource::External { handle, .. }) => {
                *handle = Some(new_handle);
                Ok(())
            }
            Some(CompiledResource::Transient { .. }) => {
                Err(GraphError::NotAnExternalResource { index: index.slot })
            }
            None => Err(GraphError::UndeclaredResource {
                pass: String::from("set_external_resource"),
                index: index.slot,
            }),
        }
    }

    /// Hand everything this generation owns to the graph-scoped releaser:
    /// transient resources return to the pool and descriptor ranges to their
    /// sub-heaps once the GPU is provably done with them.
    pub(crate) fn retire(self, releaser: &ResourceReleaser) {
        for resource in self.resources {
            match resource {
                CompiledResource::Transient {
                    resource,
                    retire_state,
                    ..
                } => {
                    releaser.add(ReleasePayload::Pooled {
                        resource,
                        state: retire_state,
                    });
                }
                CompiledResource::External { handle, .. } => {
                    if let Some(handle) = handle {
                        releaser.add(ReleasePayload::Handle(handle));
                    }
                }
            }
        }

        for (sub_heap, range) in [
            (self.heaps.gpu_visible.clone(), self.gpu_range),
            (self.heaps.render_target.clone(), self.rtv_range),
            (self.heaps.depth_stencil.clone(), self.dsv_range),
        ] {
            if range.count > 0 {
                releaser.add(ReleasePayload::DescriptorRange { sub_heap, range });
            }
        }
    }
}
