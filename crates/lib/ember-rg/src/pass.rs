use ember_rhi::backend::{PipelineState, Rect, ResourceStates, RhiError, Viewport};

use crate::compiler::FrameGraphCompiler;
use crate::graph_data::PassContext;
use crate::graph_resource::{
    DepthStencilBinding, PassIndex, RenderTargetBinding, ResourceIndex, UsageDecl, ViewDesc,
};

/// How a pass wants its recorded commands submitted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PassSubmission {
    /// Batch with neighboring passes (the normal case).
    #[default]
    Batched,
    /// Submit this pass's command list on its own, as soon as its turn in
    /// declaration order arrives. Escape hatch for work that must reach the
    /// GPU before a dependency the compiler cannot see (external queues).
    Immediate,
}

/// Recording callback of a pass. Runs once per graph execution, possibly on
/// a worker thread.
pub type PassFn = Box<dyn FnMut(&mut PassContext) -> Result<PassSubmission, RhiError> + Send>;

/// Pipeline configuration of a pass.
pub(crate) enum PassPipeline {
    Graphics {
        pipeline: PipelineState,
        viewport: Viewport,
        scissor: Rect,
    },
    Compute {
        pipeline: PipelineState,
    },
    /// Barrier-only or copy passes bind no pipeline.
    None,
}

pub(crate) struct PassDeclaration {
    pub name: String,
    pub pipeline: PassPipeline,
    pub usages: Vec<UsageDecl>,
    pub callback: Option<PassFn>,
}

/// Builder for one pass. Dropping it finishes the declaration and hands the
/// pass to the compiler.
pub struct PassBuilder<'cg> {
    pub(crate) compiler: &'cg mut FrameGraphCompiler,
    pub(crate) pass: Option<PassDeclaration>,
    pub(crate) index: PassIndex,
}

impl<'cg> Drop for PassBuilder<'cg> {
    fn drop(&mut self) {
        if let Some(pass) = self.pass.take() {
            self.compiler.finish_add_pass(pass);
        }
    }
}

impl<'cg> PassBuilder<'cg> {
    pub fn index(&self) -> PassIndex {
        self.index
    }

    fn pass_mut(&mut self) -> &mut PassDeclaration {
        self.pass.as_mut().unwrap()
    }

    pub fn graphics(mut self, pipeline: PipelineState, viewport: Viewport, scissor: Rect) -> Self {
        self.pass_mut().pipeline = PassPipeline::Graphics {
            pipeline,
            viewport,
            scissor,
        };
        self
    }

    pub fn compute(mut self, pipeline: PipelineState) -> Self {
        self.pass_mut().pipeline = PassPipeline::Compute { pipeline };
        self
    }

    /// Declare a usage with an explicit state and no view, e.g. copy traffic.
    pub fn transition(mut self, resource: ResourceIndex, state: ResourceStates) -> Self {
        self.pass_mut().usages.push(UsageDecl {
            resource,
            state,
            view: ViewDesc::None,
        });
        self
    }

    pub fn shader_resource(mut self, resource: ResourceIndex) -> Self {
        self.pass_mut().usages.push(UsageDecl {
            resource,
            state: ResourceStates::SHADER_RESOURCE,
            view: ViewDesc::ShaderResource {
                format: ember_rhi::backend::Format::Unknown,
            },
        });
        self
    }

    pub fn shader_resource_with_format(
        mut self,
        resource: ResourceIndex,
        format: ember_rhi::backend::Format,
    ) -> Self {
        self.pass_mut().usages.push(UsageDecl {
            resource,
            state: ResourceStates::SHADER_RESOURCE,
            view: ViewDesc::ShaderResource { format },
        });
        self
    }

    pub fn unordered_access(mut self, resource: ResourceIndex) -> Self {
        self.pass_mut().usages.push(UsageDecl {
            resource,
            state: ResourceStates::UNORDERED_ACCESS,
            view: ViewDesc::UnorderedAccess {
                format: ember_rhi::backend::Format::Unknown,
            },
        });
        self
    }

    pub fn render_target(mut self, resource: ResourceIndex, binding: RenderTargetBinding) -> Self {
        self.pass_mut().usages.push(UsageDecl {
            resource,
            state: ResourceStates::RENDER_TARGET,
            view: ViewDesc::RenderTarget(binding),
        });
        self
    }

    pub fn depth_stencil(mut self, resource: ResourceIndex, binding: DepthStencilBinding) -> Self {
        self.pass_mut().usages.push(UsageDecl {
            resource,
            state: ResourceStates::DEPTH_WRITE,
            view: ViewDesc::DepthStencil(binding),
        });
        self
    }

    /// Attach the recording callback and finish the pass.
    pub fn render(
        mut self,
        callback: impl FnMut(&mut PassContext) -> Result<PassSubmission, RhiError> + Send + 'static,
    ) -> PassIndex {
        let pass = self.pass_mut();
        let old = pass.callback.replace(Box::new(callback));
        debug_assert!(old.is_none());
        self.index
    }
}
