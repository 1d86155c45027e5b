//! End-to-end tests driving the whole runtime: declare, compile, execute,
//! and assert on the exact command stream the queue observed.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use ember_rhi::backend::barrier::Barrier;
use ember_rhi::backend::{
    Command, CommandQueue, Descriptor, DescriptorHeapKind, DescriptorSubHeap, Device, DeviceDesc,
    Format, ResourceDesc, ResourceFlags, ResourceStates, RhiError, ViewKind,
};

use ember_rg::{
    DepthStencilBinding, FrameGraph, FrameGraphDesc, GraphError, GraphSubHeaps, PassSubmission,
    RenderTargetBinding,
};

fn harness_with_heaps(
    gpu_visible: u32,
    render_target: u32,
    depth_stencil: u32,
    worker_count: usize,
) -> (Device, Arc<CommandQueue>, GraphSubHeaps, FrameGraph) {
    let device = Device::new(DeviceDesc::default());
    let queue = Arc::new(CommandQueue::new());
    let heaps = GraphSubHeaps {
        gpu_visible: DescriptorSubHeap::new(
            device.create_descriptor_heap(DescriptorHeapKind::GpuVisible, gpu_visible),
            0,
            gpu_visible,
        ),
        render_target: DescriptorSubHeap::new(
            device.create_descriptor_heap(DescriptorHeapKind::RenderTarget, render_target),
            0,
            render_target,
        ),
        depth_stencil: DescriptorSubHeap::new(
            device.create_descriptor_heap(DescriptorHeapKind::DepthStencil, depth_stencil),
            0,
            depth_stencil,
        ),
    };
    let graph = FrameGraph::new(
        &device,
        queue.clone(),
        FrameGraphDesc::new(heaps.clone()).with_worker_count(worker_count),
    );
    (device, queue, heaps, graph)
}

fn harness(worker_count: usize) -> (Device, Arc<CommandQueue>, GraphSubHeaps, FrameGraph) {
    harness_with_heaps(256, 64, 64, worker_count)
}

fn run_one_frame(graph: &mut FrameGraph) {
    graph.begin_frame().unwrap();
    graph.execute().unwrap();
    graph.end_frame();
}

fn stream_markers(queue: &CommandQueue) -> Vec<String> {
    queue
        .command_stream()
        .into_iter()
        .filter_map(|command| match command {
            Command::Marker(tag) => Some(tag),
            _ => None,
        })
        .collect()
}

#[test]
fn present_frame_emits_the_expected_stream() {
    let (device, queue, _heaps, mut graph) = harness(1);

    let back_desc = ResourceDesc::tex2d(256, 256, Format::Bgra8Unorm)
        .with_flags(ResourceFlags::ALLOW_RENDER_TARGET);
    let back_buffer = Arc::new(
        device
            .create_resource(back_desc, ResourceStates::PRESENT)
            .unwrap(),
    );

    graph.new_graph();
    let color = graph
        .add_external_resource(
            "backbuffer",
            Some(back_buffer.clone()),
            ResourceStates::PRESENT,
            ResourceStates::PRESENT,
        )
        .unwrap();
    let depth = graph
        .add_internal_resource(
            "depth",
            ResourceDesc::tex2d(256, 256, Format::D32Float),
            ResourceStates::COMMON,
        )
        .unwrap();

    graph
        .add_pass("main")
        .unwrap()
        .render_target(color, RenderTargetBinding::cleared([0.0, 0.0, 0.0, 1.0]))
        .depth_stencil(depth, DepthStencilBinding::cleared(1.0, 0))
        .render(|ctx| {
            ctx.cl.draw(3, 1);
            Ok(PassSubmission::Batched)
        });

    graph.compile().unwrap();
    let data = graph.compiled().unwrap();
    assert_eq!(data.render_target_descriptor_count(), 1);
    assert_eq!(data.depth_stencil_descriptor_count(), 1);
    assert_eq!(data.gpu_visible_descriptor_count(), 0);

    run_one_frame(&mut graph);

    let stream = queue.command_stream();
    assert_eq!(stream.len(), 6, "unexpected stream: {stream:?}");

    // entry barriers: back buffer into RENDER_TARGET, fresh depth into
    // DEPTH_WRITE, batched into one call in declaration order
    match &stream[0] {
        Command::ResourceBarrier(barriers) => {
            assert_eq!(barriers.len(), 2);
            assert_eq!(
                barriers[0],
                Barrier::transition(
                    back_buffer.id(),
                    ResourceStates::PRESENT,
                    ResourceStates::RENDER_TARGET
                )
            );
            assert!(matches!(
                barriers[1],
                Barrier::Transition { before, after, .. }
                    if before == ResourceStates::COMMON && after == ResourceStates::DEPTH_WRITE
            ));
        }
        other => panic!("expected entry barriers, got {other:?}"),
    }

    assert!(matches!(
        &stream[1],
        Command::SetRenderTargets { render_targets, depth_stencil }
            if render_targets.len() == 1 && depth_stencil.is_some()
    ));
    assert!(matches!(&stream[2], Command::ClearRenderTarget { .. }));
    assert!(matches!(&stream[3], Command::ClearDepthStencil { .. }));
    assert!(matches!(
        &stream[4],
        Command::Draw { vertex_count: 3, instance_count: 1 }
    ));

    // exit: only the external goes back to its declared final state; the
    // transient depth is never touched after its last use
    match &stream[5] {
        Command::ResourceBarrier(barriers) => {
            assert_eq!(
                barriers.as_slice(),
                &[Barrier::transition(
                    back_buffer.id(),
                    ResourceStates::RENDER_TARGET,
                    ResourceStates::PRESENT
                )]
            );
        }
        other => panic!("expected exit barrier, got {other:?}"),
    }
}

#[test]
fn unchanged_states_skip_barriers_but_uav_chains_get_uav_barriers() {
    let (_device, queue, _heaps, mut graph) = harness(1);

    graph.new_graph();
    let storage = graph
        .add_internal_resource(
            "storage",
            ResourceDesc::tex2d(64, 64, Format::R32Float),
            ResourceStates::COMMON,
        )
        .unwrap();

    graph.add_pass("produce").unwrap().unordered_access(storage).render(|ctx| {
        ctx.cl.dispatch(8, 8, 1);
        Ok(PassSubmission::Batched)
    });
    graph.add_pass("refine").unwrap().unordered_access(storage).render(|ctx| {
        ctx.cl.dispatch(8, 8, 1);
        Ok(PassSubmission::Batched)
    });
    graph.add_pass("consume").unwrap().shader_resource(storage).render(|ctx| {
        ctx.cl.draw(3, 1);
        Ok(PassSubmission::Batched)
    });
    graph.add_pass("consume_again").unwrap().shader_resource(storage).render(|ctx| {
        ctx.cl.draw(3, 1);
        Ok(PassSubmission::Batched)
    });

    graph.compile().unwrap();
    run_one_frame(&mut graph);

    // one submission per pass with a single worker
    let log = queue.submission_log();
    assert_eq!(log.len(), 4);

    let barriers_of = |submission: usize| -> Vec<Barrier> {
        log[submission].lists[0]
            .iter()
            .filter_map(|command| match command {
                Command::ResourceBarrier(barriers) => Some(barriers.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    };

    // produce: plain entry transition; no exit since the next use keeps the state
    let produce = barriers_of(0);
    assert_eq!(produce.len(), 1);
    assert!(matches!(
        produce[0],
        Barrier::Transition { before, after, .. }
            if before == ResourceStates::COMMON && after == ResourceStates::UNORDERED_ACCESS
    ));

    // refine: UAV-to-UAV hand-off needs a UAV barrier, then the exit
    // transition into the consumer's state
    let refine = barriers_of(1);
    assert_eq!(refine.len(), 2);
    assert!(matches!(refine[0], Barrier::UnorderedAccess { .. }));
    assert!(matches!(
        refine[1],
        Barrier::Transition { before, after, .. }
            if before == ResourceStates::UNORDERED_ACCESS
                && after == ResourceStates::SHADER_RESOURCE
    ));

    // both consumers see the state they need already in place
    assert!(barriers_of(2).is_empty());
    assert!(barriers_of(3).is_empty());
}

#[test]
fn descriptors_are_assigned_in_declaration_order() {
    let (_device, _queue, heaps, mut graph) = harness(1);

    graph.new_graph();
    let a = graph
        .add_internal_resource(
            "a",
            ResourceDesc::tex2d(32, 32, Format::R32Float),
            ResourceStates::COMMON,
        )
        .unwrap();
    let b = graph
        .add_internal_resource(
            "b",
            ResourceDesc::tex2d(32, 32, Format::Rgba16Float),
            ResourceStates::COMMON,
        )
        .unwrap();

    let seen: Arc<Mutex<Vec<(u64, Option<Descriptor>)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    graph.add_pass("write_a").unwrap().unordered_access(a).render(move |ctx| {
        let reg = ctx.get_resource(a).unwrap();
        sink.lock().push((reg.id, reg.descriptor));
        Ok(PassSubmission::Batched)
    });
    let sink = seen.clone();
    graph.add_pass("read_both").unwrap().shader_resource(a).shader_resource(b).render(
        move |ctx| {
            let reg_a = ctx.get_resource(a).unwrap();
            let reg_b = ctx.get_resource(b).unwrap();
            sink.lock().push((reg_a.id, reg_a.descriptor));
            sink.lock().push((reg_b.id, reg_b.descriptor));
            Ok(PassSubmission::Batched)
        },
    );

    graph.compile().unwrap();
    assert_eq!(graph.compiled().unwrap().gpu_visible_descriptor_count(), 3);
    run_one_frame(&mut graph);

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);

    // slots come out of one contiguous range in declaration order
    let indices: Vec<u32> = seen.iter().map(|(_, d)| d.unwrap().index).collect();
    assert_eq!(indices, vec![indices[0], indices[0] + 1, indices[0] + 2]);

    // and each slot holds a view of the right resource and kind
    let kinds = [
        ViewKind::UnorderedAccess,
        ViewKind::ShaderResource,
        ViewKind::ShaderResource,
    ];
    for ((id, descriptor), kind) in seen.iter().zip(kinds) {
        let record = heaps.gpu_visible.view_at(descriptor.unwrap()).unwrap();
        assert_eq!(record.resource, *id);
        assert_eq!(record.kind, kind);
    }
}

#[test]
fn parallel_recording_still_submits_in_declaration_order() {
    let (_device, queue, _heaps, mut graph) = harness(4);

    graph.new_graph();
    for i in 0..8 {
        let name = format!("pass{i}");
        graph.add_pass(&name).unwrap().render(move |ctx| {
            // jitter recording time so workers finish out of order
            let delay = rand::thread_rng().gen_range(0..5);
            std::thread::sleep(Duration::from_millis(delay));
            ctx.cl.marker(format!("p{i}"));
            Ok(PassSubmission::Batched)
        });
    }

    graph.compile().unwrap();
    run_one_frame(&mut graph);

    let expected: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
    assert_eq!(stream_markers(&queue), expected);
}

#[test]
fn immediate_pass_is_submitted_alone_in_order() {
    let (_device, queue, _heaps, mut graph) = harness(2);

    graph.new_graph();
    graph.add_pass("before").unwrap().render(|ctx| {
        ctx.cl.marker("p0");
        Ok(PassSubmission::Batched)
    });
    graph.add_pass("urgent").unwrap().render(|ctx| {
        ctx.cl.marker("p1");
        Ok(PassSubmission::Immediate)
    });
    graph.add_pass("after").unwrap().render(|ctx| {
        ctx.cl.marker("p2");
        Ok(PassSubmission::Batched)
    });

    graph.compile().unwrap();
    run_one_frame(&mut graph);

    assert_eq!(stream_markers(&queue), vec!["p0", "p1", "p2"]);

    // the immediate pass shares its submission with no one
    let alone = queue.submission_log().into_iter().any(|submission| {
        let markers: Vec<_> = submission
            .lists
            .iter()
            .flatten()
            .filter_map(|command| match command {
                Command::Marker(tag) => Some(tag.as_str().to_owned()),
                _ => None,
            })
            .collect();
        markers == ["p1"]
    });
    assert!(alone);
}

#[test]
fn a_failing_pass_aborts_execution_and_surfaces_the_pass_name() {
    let (_device, queue, _heaps, mut graph) = harness(4);

    graph.new_graph();
    graph.add_pass("first").unwrap().render(|ctx| {
        ctx.cl.marker("p0");
        Ok(PassSubmission::Batched)
    });
    graph
        .add_pass("fails")
        .unwrap()
        .render(|_| Err(RhiError::CommandListNotRecording));
    graph.add_pass("after").unwrap().render(|ctx| {
        ctx.cl.marker("p2");
        Ok(PassSubmission::Batched)
    });

    graph.compile().unwrap();
    graph.begin_frame().unwrap();

    match graph.execute().unwrap_err() {
        GraphError::PassRecording { pass, .. } => assert_eq!(pass, "fails"),
        other => panic!("expected a recording failure, got {other:?}"),
    }
    graph.end_frame();

    // the failing pass leaves a hole in the submission chain, so whatever a
    // worker recorded past it can never reach the queue
    assert!(!stream_markers(&queue).contains(&"p2".to_string()));
}

fn declare_reusing_generation(graph: &mut FrameGraph) {
    graph.new_graph();
    let color = graph
        .add_internal_resource(
            "color",
            ResourceDesc::tex2d(64, 64, Format::Rgba8Unorm),
            ResourceStates::COMMON,
        )
        .unwrap();
    graph
        .add_pass("draw")
        .unwrap()
        .render_target(color, RenderTargetBinding::default())
        .render(|ctx| {
            ctx.cl.draw(3, 1);
            Ok(PassSubmission::Batched)
        });
    graph.compile().unwrap();
}

#[test]
fn restart_reuses_pooled_transients_and_reaches_a_steady_state() {
    let (device, queue, _heaps, mut graph) = harness(1);

    declare_reusing_generation(&mut graph);
    let created_after_first = device.resource_creation_count();
    run_one_frame(&mut graph);

    // second generation: same shape, so the pool must satisfy it fully
    declare_reusing_generation(&mut graph);
    assert_eq!(device.resource_creation_count(), created_after_first);
    let start = queue.submission_log().len();
    run_one_frame(&mut graph);
    let second: Vec<_> = queue.submission_log()[start..].to_vec();

    // third generation: identical to the second, barriers included, since
    // the pooled resource comes back in the same state each time
    declare_reusing_generation(&mut graph);
    assert_eq!(device.resource_creation_count(), created_after_first);
    let start = queue.submission_log().len();
    run_one_frame(&mut graph);
    let third: Vec<_> = queue.submission_log()[start..].to_vec();

    let commands = |log: &[ember_rhi::backend::Submission]| -> Vec<Vec<Command>> {
        log.iter().map(|s| s.lists.concat()).collect()
    };
    assert_eq!(commands(&second), commands(&third));
}

#[test]
fn externals_can_be_rebound_between_frames_without_recompiling() {
    let (device, queue, heaps, mut graph) = harness(1);

    let desc = ResourceDesc::tex2d(128, 128, Format::Rgba8Unorm);
    let first = Arc::new(
        device
            .create_resource(desc, ResourceStates::COMMON)
            .unwrap(),
    );
    let second = Arc::new(
        device
            .create_resource(desc, ResourceStates::COMMON)
            .unwrap(),
    );

    graph.new_graph();
    let external = graph
        .add_external_resource(
            "per_frame_input",
            None,
            ResourceStates::COMMON,
            ResourceStates::COMMON,
        )
        .unwrap();
    graph.add_pass("sample").unwrap().shader_resource(external).render(|ctx| {
        ctx.cl.draw(3, 1);
        Ok(PassSubmission::Batched)
    });
    graph.compile().unwrap();

    // unbound external: execution must fail, not fabricate a view
    graph.begin_frame().unwrap();
    assert!(matches!(
        graph.execute().unwrap_err(),
        GraphError::ExternalResourceNotBound { .. }
    ));
    graph.end_frame();

    graph.set_external_resource(external, first.clone()).unwrap();
    run_one_frame(&mut graph);

    graph.set_external_resource(external, second.clone()).unwrap();
    run_one_frame(&mut graph);

    // the per-execute view rewrite leaves the slot pointing at the latest
    // handle, in the same descriptor it always had
    let slot = Descriptor {
        heap: heaps.gpu_visible.heap().id(),
        index: 0,
    };
    assert_eq!(heaps.gpu_visible.view_at(slot).unwrap().resource, second.id());

    // both frames transitioned the handle bound at the time
    let transitions: Vec<u64> = queue
        .command_stream()
        .into_iter()
        .filter_map(|command| match command {
            Command::ResourceBarrier(barriers) => Some(barriers),
            _ => None,
        })
        .flatten()
        .map(|barrier| barrier.resource())
        .collect();
    assert!(transitions.contains(&first.id()));
    assert!(transitions.contains(&second.id()));
}

#[test]
fn using_the_same_resource_twice_in_one_pass_is_rejected() {
    let (_device, _queue, _heaps, mut graph) = harness(1);

    graph.new_graph();
    let tex = graph
        .add_internal_resource(
            "tex",
            ResourceDesc::tex2d(16, 16, Format::Rgba8Unorm),
            ResourceStates::COMMON,
        )
        .unwrap();
    graph
        .add_pass("double_use")
        .unwrap()
        .shader_resource(tex)
        .shader_resource(tex)
        .render(|_| Ok(PassSubmission::Batched));

    assert!(matches!(
        graph.compile().unwrap_err(),
        GraphError::DuplicateResourceUsage { .. }
    ));
}

#[test]
fn conflicting_explicit_view_formats_are_rejected() {
    let (_device, _queue, _heaps, mut graph) = harness(1);

    graph.new_graph();
    let tex = graph
        .add_internal_resource(
            "tex",
            ResourceDesc::tex2d(16, 16, Format::R32Float),
            ResourceStates::COMMON,
        )
        .unwrap();
    graph
        .add_pass("read_as_float")
        .unwrap()
        .shader_resource_with_format(tex, Format::R32Float)
        .render(|_| Ok(PassSubmission::Batched));
    graph
        .add_pass("read_as_uint")
        .unwrap()
        .shader_resource_with_format(tex, Format::R32Uint)
        .render(|_| Ok(PassSubmission::Batched));

    assert!(matches!(
        graph.compile().unwrap_err(),
        GraphError::ConflictingViewFormat { .. }
    ));
}

#[test]
fn descriptor_exhaustion_surfaces_as_a_compile_error() {
    let (_device, _queue, _heaps, mut graph) = harness_with_heaps(1, 8, 8, 1);

    graph.new_graph();
    let a = graph
        .add_internal_resource(
            "a",
            ResourceDesc::tex2d(16, 16, Format::Rgba8Unorm),
            ResourceStates::COMMON,
        )
        .unwrap();
    let b = graph
        .add_internal_resource(
            "b",
            ResourceDesc::tex2d(16, 16, Format::Rgba8Unorm),
            ResourceStates::COMMON,
        )
        .unwrap();
    graph
        .add_pass("needs_two")
        .unwrap()
        .shader_resource(a)
        .shader_resource(b)
        .render(|_| Ok(PassSubmission::Batched));

    assert!(matches!(
        graph.compile().unwrap_err(),
        GraphError::Rhi(RhiError::OutOfDescriptors { .. })
    ));
}

#[test]
fn graphics_and_compute_passes_bind_their_pipelines() {
    let (device, queue, _heaps, mut graph) = harness(1);

    let graphics = device.create_pipeline_state(ember_rhi::backend::PipelineKind::Graphics);
    let compute = device.create_pipeline_state(ember_rhi::backend::PipelineKind::Compute);

    graph.new_graph();
    let color = graph
        .add_internal_resource(
            "color",
            ResourceDesc::tex2d(128, 128, Format::Rgba8Unorm),
            ResourceStates::COMMON,
        )
        .unwrap();

    graph
        .add_pass("raster")
        .unwrap()
        .graphics(
            graphics,
            ember_rhi::backend::Viewport::from_extent(128.0, 128.0),
            ember_rhi::backend::Rect::from_extent(128, 128),
        )
        .render_target(color, RenderTargetBinding::default())
        .render(|ctx| {
            ctx.cl.draw(3, 1);
            Ok(PassSubmission::Batched)
        });
    graph
        .add_pass("post")
        .unwrap()
        .compute(compute)
        .unordered_access(color)
        .render(|ctx| {
            ctx.cl.dispatch(16, 16, 1);
            Ok(PassSubmission::Batched)
        });

    graph.compile().unwrap();
    run_one_frame(&mut graph);

    let stream = queue.command_stream();
    let position = |command: &Command| stream.iter().position(|c| c == command).unwrap();

    let set_graphics = position(&Command::SetPipelineState { pipeline: graphics.id() });
    let set_compute = position(&Command::SetPipelineState { pipeline: compute.id() });
    let draw = position(&Command::Draw { vertex_count: 3, instance_count: 1 });
    let dispatch = position(&Command::Dispatch { x: 16, y: 16, z: 1 });

    assert!(set_graphics < draw);
    assert!(draw < set_compute);
    assert!(set_compute < dispatch);

    assert!(stream.contains(&Command::SetGraphicsRootSignature {
        root_signature: graphics.root_signature()
    }));
    assert!(stream.contains(&Command::SetComputeRootSignature {
        root_signature: compute.root_signature()
    }));
    assert!(stream
        .iter()
        .any(|c| matches!(c, Command::SetViewport(_))));
    assert!(stream.iter().any(|c| matches!(c, Command::SetScissor(_))));
}

#[test]
fn exceeding_the_device_memory_budget_fails_compilation() {
    let device = Device::new(DeviceDesc {
        memory_budget_bytes: Some(1024),
    });
    let queue = Arc::new(CommandQueue::new());
    let heaps = GraphSubHeaps {
        gpu_visible: DescriptorSubHeap::new(
            device.create_descriptor_heap(DescriptorHeapKind::GpuVisible, 16),
            0,
            16,
        ),
        render_target: DescriptorSubHeap::new(
            device.create_descriptor_heap(DescriptorHeapKind::RenderTarget, 16),
            0,
            16,
        ),
        depth_stencil: DescriptorSubHeap::new(
            device.create_descriptor_heap(DescriptorHeapKind::DepthStencil, 16),
            0,
            16,
        ),
    };
    let mut graph = FrameGraph::new(
        &device,
        queue,
        FrameGraphDesc::new(heaps).with_worker_count(1),
    );

    graph.new_graph();
    let huge = graph
        .add_internal_resource(
            "huge",
            ResourceDesc::tex2d(4096, 4096, Format::Rgba16Float),
            ResourceStates::COMMON,
        )
        .unwrap();
    graph
        .add_pass("fill")
        .unwrap()
        .unordered_access(huge)
        .render(|_| Ok(PassSubmission::Batched));

    assert!(matches!(
        graph.compile().unwrap_err(),
        GraphError::Rhi(RhiError::OutOfDeviceMemory { .. })
    ));
}

#[test]
fn per_frame_scratch_descriptors_are_reclaimed_after_the_frame_fence() {
    let (_device, _queue, heaps, mut graph) = harness(1);

    graph.new_graph();
    graph.add_pass("scratch_user").unwrap().render(|ctx| {
        let range = ctx.allocate_transient_descriptors(8)?;
        assert_eq!(range.count, 8);
        Ok(PassSubmission::Batched)
    });
    graph.compile().unwrap();

    let baseline = heaps.gpu_visible.allocated_count();

    run_one_frame(&mut graph);
    assert_eq!(heaps.gpu_visible.allocated_count(), baseline + 8);

    // the next begin_frame collects past the frame's release point
    graph.begin_frame().unwrap();
    assert_eq!(heaps.gpu_visible.allocated_count(), baseline);
    graph.end_frame();
}
