use std::sync::Arc;

use ember_rhi::backend::{
    Descriptor, Format, Resource, ResourceDesc, ResourceFlags, ResourceStates, ViewKind,
    ViewRecord,
};

use crate::allocator::ResourceAllocator;
use crate::error::GraphError;
use crate::graph_data::{
    CompiledResource, FrameGraphData, GraphSubHeaps, PassNode, PassResourceEntry,
};
use crate::graph_resource::{
    clear_value_from_view, resolve_format, PassIndex, ResourceIndex, ResourceNode, ViewDesc,
};
use crate::pass::{PassBuilder, PassDeclaration, PassPipeline};

/// Builds the declarative pass/resource graph of one generation and compiles
/// it into a linear execution plan.
///
/// Declaration order is the sole ordering guarantee: passes are never
/// reordered, even where reordering would save a barrier.
pub struct FrameGraphCompiler {
    generation: u32,
    resources: Vec<ResourceNode>,
    passes: Vec<PassDeclaration>,
}

impl FrameGraphCompiler {
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            resources: Vec::new(),
            passes: Vec::new(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Declare a transient resource owned by this graph generation.
    pub fn add_internal_resource(
        &mut self,
        name: impl Into<String>,
        desc: ResourceDesc,
        initial_state: ResourceStates,
    ) -> ResourceIndex {
        let index = ResourceIndex {
            slot: self.resources.len() as u32,
            generation: self.generation,
        };
        self.resources.push(ResourceNode::Transient {
            name: name.into(),
            desc,
            initial_state,
        });
        index
    }

    /// Declare a caller-owned resource. `handle` may stay `None` until bound
    /// via `set_external_resource`, but must be bound before execution.
    pub fn add_external_resource(
        &mut self,
        name: impl Into<String>,
        handle: Option<Arc<Resource>>,
        initial_state: ResourceStates,
        final_state: ResourceStates,
    ) -> ResourceIndex {
        let index = ResourceIndex {
            slot: self.resources.len() as u32,
            generation: self.generation,
        };
        self.resources.push(ResourceNode::External {
            name: name.into(),
            handle,
            initial_state,
            final_state,
        });
        index
    }

    pub fn add_pass<'cg>(&'cg mut self, name: &str) -> PassBuilder<'cg> {
        let index = PassIndex {
            slot: self.passes.len() as u32,
            generation: self.generation,
        };
        PassBuilder {
            pass: Some(PassDeclaration {
                name: name.to_string(),
                pipeline: PassPipeline::None,
                usages: Vec::new(),
                callback: None,
            }),
            compiler: self,
            index,
        }
    }

    pub(crate) fn finish_add_pass(&mut self, pass: PassDeclaration) {
        glog::debug!("declared pass '{}' with {} usages", pass.name, pass.usages.len());
        self.passes.push(pass);
    }

    fn check_index(&self, pass: &str, index: ResourceIndex) -> Result<usize, GraphError> {
        if index.generation != self.generation {
            return Err(GraphError::StaleResourceIndex {
                index: index.slot,
                index_generation: index.generation,
                current_generation: self.generation,
            });
        }
        let slot = index.slot as usize;
        if slot >= self.resources.len() {
            return Err(GraphError::UndeclaredResource {
                pass: pass.to_string(),
                index: index.slot,
            });
        }
        Ok(slot)
    }

    /// Compile the declared graph into an executable plan: validate usages,
    /// widen transient creation flags, allocate backing resources and
    /// descriptors, create views, and compute every state-transition triple.
    pub fn compile(
        mut self,
        allocator: &mut ResourceAllocator,
        heaps: &GraphSubHeaps,
    ) -> Result<FrameGraphData, GraphError> {
        let resource_count = self.resources.len();

        // 1. per-resource user lists in declaration order, descriptor tallies,
        //    and declaration-level validation
        let mut users: Vec<Vec<(usize, usize)>> = vec![Vec::new(); resource_count];
        let mut view_formats: Vec<Option<Format>> = vec![None; resource_count];
        let mut gpu_visible_tally = 0u32;
        let mut render_target_tally = 0u32;
        let mut depth_stencil_tally = 0u32;

        for (pass_idx, pass) in self.passes.iter().enumerate() {
            for (usage_idx, usage) in pass.usages.iter().enumerate() {
                let slot = self.check_index(&pass.name, usage.resource)?;

                if users[slot].iter().any(|(p, _)| *p == pass_idx) {
                    return Err(GraphError::DuplicateResourceUsage {
                        pass: pass.name.clone(),
                        index: usage.resource.slot,
                    });
                }
                users[slot].push((pass_idx, usage_idx));

                match usage.view {
                    ViewDesc::None => {}
                    ViewDesc::ShaderResource { .. } | ViewDesc::UnorderedAccess { .. } => {
                        gpu_visible_tally += 1
                    }
                    ViewDesc::RenderTarget(_) => render_target_tally += 1,
                    ViewDesc::DepthStencil(_) => depth_stencil_tally += 1,
                }

                if let Some(format) = usage.view.format() {
                    if format != Format::Unknown {
                        match view_formats[slot] {
                            Some(first) if first != format => {
                                return Err(GraphError::ConflictingViewFormat {
                                    index: usage.resource.slot,
                                    first,
                                    second: format,
                                });
                            }
                            Some(_) => {}
                            None => view_formats[slot] = Some(format),
                        }
                    }
                }
            }
        }

        // 2. widen transient creation flags to every requested usage and
        //    infer missing clear values from the first clearing binding;
        //    must happen before allocation since both feed the pool key
        for (slot, list) in users.iter().enumerate() {
            let ResourceNode::Transient { desc, .. } = &mut self.resources[slot] else {
                continue;
            };

            for (pass_idx, usage_idx) in list {
                let usage = &self.passes[*pass_idx].usages[*usage_idx];

                if usage.state.contains(ResourceStates::RENDER_TARGET) {
                    desc.flags |= ResourceFlags::ALLOW_RENDER_TARGET;
                }
                if usage.state.intersects(ResourceStates::DEPTH_WRITE | ResourceStates::DEPTH_READ) {
                    desc.flags |= ResourceFlags::ALLOW_DEPTH_STENCIL;
                }
                if usage.state.contains(ResourceStates::UNORDERED_ACCESS) {
                    desc.flags |= ResourceFlags::ALLOW_UNORDERED_ACCESS;
                }

                if desc.clear_value.is_none() {
                    desc.clear_value = clear_value_from_view(&usage.view, desc.format);
                }
            }
        }

        // 3. bind concrete resources: externals verbatim, transients through
        //    the allocator, which may answer with a reused resource in a
        //    different state than requested
        let mut compiled_resources = Vec::with_capacity(resource_count);
        let mut actual_initial = Vec::with_capacity(resource_count);

        for node in &self.resources {
            match node {
                ResourceNode::Transient {
                    name,
                    desc,
                    initial_state,
                } => {
                    let (resource, actual) = allocator.allocate(desc, *initial_state)?;
                    glog::debug!(
                        "transient '{}' bound to resource {} in state {:?}",
                        name,
                        resource.id(),
                        actual
                    );
                    actual_initial.push(actual);
                    compiled_resources.push(CompiledResource::Transient {
                        name: name.clone(),
                        resource,
                        retire_state: actual,
                    });
                }
                ResourceNode::External {
                    name,
                    handle,
                    initial_state,
                    final_state,
                } => {
                    actual_initial.push(*initial_state);
                    compiled_resources.push(CompiledResource::External {
                        name: name.clone(),
                        handle: handle.clone(),
                        initial_state: *initial_state,
                        final_state: *final_state,
                    });
                }
            }
        }

        // 4. carve descriptor ranges and assign slots in declaration order
        let gpu_range = heaps.gpu_visible.allocate_range(gpu_visible_tally)?;
        let rtv_range = heaps.render_target.allocate_range(render_target_tally)?;
        let dsv_range = heaps.depth_stencil.allocate_range(depth_stencil_tally)?;

        let mut next_gpu = 0u32;
        let mut next_rtv = 0u32;
        let mut next_dsv = 0u32;

        let mut pass_entries: Vec<Vec<PassResourceEntry>> = Vec::with_capacity(self.passes.len());

        for pass in &self.passes {
            let mut entries = Vec::with_capacity(pass.usages.len());
            for usage in &pass.usages {
                let slot = usage.resource.slot as usize;

                let descriptor = match usage.view {
                    ViewDesc::None => None,
                    ViewDesc::ShaderResource { .. } | ViewDesc::UnorderedAccess { .. } => {
                        let descriptor = gpu_range.descriptor(next_gpu);
                        next_gpu += 1;
                        Some(descriptor)
                    }
                    ViewDesc::RenderTarget(_) => {
                        let descriptor = rtv_range.descriptor(next_rtv);
                        next_rtv += 1;
                        Some(descriptor)
                    }
                    ViewDesc::DepthStencil(_) => {
                        let descriptor = dsv_range.descriptor(next_dsv);
                        next_dsv += 1;
                        Some(descriptor)
                    }
                };

                // eager view creation; unbound externals are deferred to the
                // per-execute rewrite
                if let (Some(descriptor), Some(raw)) =
                    (descriptor, compiled_resources[slot].try_raw())
                {
                    write_view(heaps, descriptor, &usage.view, raw);
                }

                entries.push(PassResourceEntry {
                    resource: usage.resource.slot,
                    before: ResourceStates::COMMON,
                    state: usage.state,
                    after: ResourceStates::COMMON,
                    view: usage.view,
                    descriptor,
                });
            }
            pass_entries.push(entries);
        }

        // 5. state triples. The last usage of an external resource inherits
        //    the caller-declared final state; every other transition is local
        //    to neighboring uses, so transients are never touched after their
        //    last use.
        for (slot, list) in users.iter().enumerate() {
            for (position, (pass_idx, usage_idx)) in list.iter().enumerate() {
                let before = if position == 0 {
                    actual_initial[slot]
                } else {
                    let (prev_pass, prev_usage) = list[position - 1];
                    pass_entries[prev_pass][prev_usage].after
                };

                let current = pass_entries[*pass_idx][*usage_idx].state;

                let after = if position + 1 < list.len() {
                    let (next_pass, next_usage) = list[position + 1];
                    pass_entries[next_pass][next_usage].state
                } else {
                    match &compiled_resources[slot] {
                        CompiledResource::External { final_state, .. } if *final_state != current => {
                            *final_state
                        }
                        _ => current,
                    }
                };

                let entry = &mut pass_entries[*pass_idx][*usage_idx];
                entry.before = before;
                entry.after = after;
            }

            // transients go back to the pool in their last known state
            if let CompiledResource::Transient { retire_state, .. } = &mut compiled_resources[slot] {
                if let Some((pass_idx, usage_idx)) = list.last() {
                    *retire_state = pass_entries[*pass_idx][*usage_idx].after;
                }
            }
        }

        // 6. emit executable pass nodes
        let nodes = self
            .passes
            .into_iter()
            .zip(pass_entries)
            .map(|(pass, entries)| PassNode::new(pass, entries))
            .collect();

        glog::debug!(
            "compiled graph generation {}: {} resources, {} descriptors ({} gpu-visible)",
            self.generation,
            resource_count,
            gpu_visible_tally + render_target_tally + depth_stencil_tally,
            gpu_visible_tally,
        );

        Ok(FrameGraphData::new(
            self.generation,
            compiled_resources,
            nodes,
            heaps.clone(),
            gpu_range,
            rtv_range,
            dsv_range,
        ))
    }
}

pub(crate) fn write_view(
    heaps: &GraphSubHeaps,
    descriptor: Descriptor,
    view: &ViewDesc,
    resource: &Resource,
) {
    let record = |kind: ViewKind, format: Format| ViewRecord {
        resource: resource.id(),
        kind,
        format: resolve_format(format, resource.desc.format),
    };

    match view {
        ViewDesc::None => {}
        ViewDesc::ShaderResource { format } => {
            heaps
                .gpu_visible
                .write_view(descriptor, record(ViewKind::ShaderResource, *format));
        }
        ViewDesc::UnorderedAccess { format } => {
            heaps
                .gpu_visible
                .write_view(descriptor, record(ViewKind::UnorderedAccess, *format));
        }
        ViewDesc::RenderTarget(binding) => {
            heaps
                .render_target
                .write_view(descriptor, record(ViewKind::RenderTarget, binding.format));
        }
        ViewDesc::DepthStencil(binding) => {
            heaps
                .depth_stencil
                .write_view(descriptor, record(ViewKind::DepthStencil, binding.format));
        }
    }
}
