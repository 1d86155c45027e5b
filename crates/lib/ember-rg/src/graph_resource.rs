use std::sync::Arc;

use ember_rhi::backend::{ClearValue, Format, Resource, ResourceDesc, ResourceStates};

/// Index of a declared resource within one graph generation.
///
/// Indices die with their generation: the generation id rides along so that a
/// stale index from an earlier `new_graph()` is caught instead of silently
/// aliasing whatever now lives in that slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResourceIndex {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl ResourceIndex {
    pub const NIL: ResourceIndex = ResourceIndex {
        slot: u32::MAX,
        generation: 0,
    };

    pub fn is_nil(&self) -> bool {
        self.slot == u32::MAX
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Index of a declared pass within one graph generation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PassIndex {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl PassIndex {
    pub const NIL: PassIndex = PassIndex {
        slot: u32::MAX,
        generation: 0,
    };

    pub fn is_nil(&self) -> bool {
        self.slot == u32::MAX
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// A declared resource node. Exactly one of the two variants holds.
pub(crate) enum ResourceNode {
    /// Backed by the allocator for the lifetime of one graph generation.
    Transient {
        name: String,
        desc: ResourceDesc,
        initial_state: ResourceStates,
    },
    /// Caller-owned; the graph references but never owns it. The handle may
    /// stay unbound until just before execution and may be rebound between
    /// frames (swap-chain back buffers change index every frame).
    External {
        name: String,
        handle: Option<Arc<Resource>>,
        /// State the caller guarantees on entry.
        initial_state: ResourceStates,
        /// State the caller expects the graph to leave the resource in.
        final_state: ResourceStates,
    },
}

impl ResourceNode {
    pub(crate) fn name(&self) -> &str {
        match self {
            ResourceNode::Transient { name, .. } => name,
            ResourceNode::External { name, .. } => name,
        }
    }
}

/// Render-target binding metadata of a pass usage.
#[derive(Clone, Copy, Debug)]
pub struct RenderTargetBinding {
    /// Attach to the output merger when the pass begins.
    pub bind: bool,
    /// Clear on entry with this color.
    pub clear: Option<[f32; 4]>,
    /// View format; `Unknown` resolves from the resource's own format.
    pub format: Format,
}

impl Default for RenderTargetBinding {
    fn default() -> Self {
        Self {
            bind: true,
            clear: None,
            format: Format::Unknown,
        }
    }
}

impl RenderTargetBinding {
    pub fn cleared(color: [f32; 4]) -> Self {
        Self {
            clear: Some(color),
            ..Default::default()
        }
    }
}

/// Depth-stencil binding metadata of a pass usage.
#[derive(Clone, Copy, Debug)]
pub struct DepthStencilBinding {
    pub bind: bool,
    pub clear: Option<(f32, u8)>,
    pub format: Format,
}

impl Default for DepthStencilBinding {
    fn default() -> Self {
        Self {
            bind: true,
            clear: None,
            format: Format::Unknown,
        }
    }
}

impl DepthStencilBinding {
    pub fn cleared(depth: f32, stencil: u8) -> Self {
        Self {
            clear: Some((depth, stencil)),
            ..Default::default()
        }
    }
}

/// The view a pass usage needs on its resource, if any.
#[derive(Clone, Copy, Debug)]
pub enum ViewDesc {
    None,
    ShaderResource { format: Format },
    UnorderedAccess { format: Format },
    RenderTarget(RenderTargetBinding),
    DepthStencil(DepthStencilBinding),
}

impl ViewDesc {
    pub(crate) fn format(&self) -> Option<Format> {
        match self {
            ViewDesc::None => None,
            ViewDesc::ShaderResource { format } => Some(*format),
            ViewDesc::UnorderedAccess { format } => Some(*format),
            ViewDesc::RenderTarget(binding) => Some(binding.format),
            ViewDesc::DepthStencil(binding) => Some(binding.format),
        }
    }
}

/// One (resource -> usage) entry of a pass declaration.
pub(crate) struct UsageDecl {
    pub resource: ResourceIndex,
    pub state: ResourceStates,
    pub view: ViewDesc,
}

pub(crate) fn clear_value_from_view(view: &ViewDesc, resource_format: Format) -> Option<ClearValue> {
    match view {
        ViewDesc::RenderTarget(binding) => binding.clear.map(|value| ClearValue::Color {
            format: resolve_format(binding.format, resource_format),
            value,
        }),
        ViewDesc::DepthStencil(binding) => {
            binding.clear.map(|(depth, stencil)| ClearValue::DepthStencil {
                format: resolve_format(binding.format, resource_format),
                depth,
                stencil,
            })
        }
        _ => None,
    }
}

/// `Unknown` view formats are filled in from the underlying resource.
pub(crate) fn resolve_format(view_format: Format, resource_format: Format) -> Format {
    if view_format == Format::Unknown {
        resource_format
    } else {
        view_format
    }
}
