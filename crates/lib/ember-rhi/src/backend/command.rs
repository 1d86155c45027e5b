use std::sync::atomic::{AtomicU64, Ordering};

use super::barrier::Barrier;
use super::descriptor::Descriptor;
use super::error::RhiError;
use super::pipeline::{PipelineState, Rect, Viewport};

/// Backing storage for command lists. One allocator per worker thread per
/// in-flight frame; reset only once the GPU has finished that frame.
pub struct CommandAllocator {
    id: u64,
    reset_count: AtomicU64,
}

impl CommandAllocator {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            reset_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reset(&self) {
        self.reset_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count.load(Ordering::Relaxed)
    }
}

/// The recorded command stream. Everything the render-graph runtime emits
/// lands here, so tests can assert on barrier placement and ordering.
#[derive(Clone, PartialEq, Debug)]
pub enum Command {
    ResourceBarrier(Vec<Barrier>),
    SetRenderTargets {
        render_targets: Vec<Descriptor>,
        depth_stencil: Option<Descriptor>,
    },
    ClearRenderTarget {
        view: Descriptor,
        color: [f32; 4],
    },
    ClearDepthStencil {
        view: Descriptor,
        depth: f32,
        stencil: u8,
    },
    SetPipelineState {
        pipeline: u64,
    },
    SetGraphicsRootSignature {
        root_signature: u64,
    },
    SetComputeRootSignature {
        root_signature: u64,
    },
    SetViewport(Viewport),
    SetScissor(Rect),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    /// Free-form debug marker; pass callbacks use these to tag their work.
    Marker(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ListState {
    Initial,
    Recording,
    Closed,
}

pub struct CommandList {
    id: u64,
    allocator: Option<u64>,
    state: ListState,
    commands: Vec<Command>,
}

impl CommandList {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            allocator: None,
            state: ListState::Initial,
            commands: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state == ListState::Closed
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// (Re)open the list for recording against the given allocator,
    /// discarding previously recorded commands.
    pub fn begin(&mut self, allocator: &CommandAllocator) {
        self.allocator = Some(allocator.id());
        self.commands.clear();
        self.state = ListState::Recording;
    }

    pub fn close(&mut self) -> Result<(), RhiError> {
        if self.state != ListState::Recording {
            return Err(RhiError::CommandListNotRecording);
        }
        self.state = ListState::Closed;
        Ok(())
    }

    fn record(&mut self, command: Command) {
        debug_assert_eq!(self.state, ListState::Recording);
        self.commands.push(command);
    }

    pub fn resource_barrier(&mut self, barriers: &[Barrier]) {
        if barriers.is_empty() {
            return;
        }
        self.record(Command::ResourceBarrier(barriers.to_vec()));
    }

    pub fn set_render_targets(
        &mut self,
        render_targets: &[Descriptor],
        depth_stencil: Option<Descriptor>,
    ) {
        self.record(Command::SetRenderTargets {
            render_targets: render_targets.to_vec(),
            depth_stencil,
        });
    }

    pub fn clear_render_target(&mut self, view: Descriptor, color: [f32; 4]) {
        self.record(Command::ClearRenderTarget { view, color });
    }

    pub fn clear_depth_stencil(&mut self, view: Descriptor, depth: f32, stencil: u8) {
        self.record(Command::ClearDepthStencil { view, depth, stencil });
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        self.record(Command::SetPipelineState { pipeline: pipeline.id() });
    }

    pub fn set_graphics_root_signature(&mut self, root_signature: u64) {
        self.record(Command::SetGraphicsRootSignature { root_signature });
    }

    pub fn set_compute_root_signature(&mut self, root_signature: u64) {
        self.record(Command::SetComputeRootSignature { root_signature });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, scissor: Rect) {
        self.record(Command::SetScissor(scissor));
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn marker(&mut self, text: impl Into<String>) {
        self.record(Command::Marker(text.into()));
    }
}
