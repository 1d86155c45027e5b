use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

use super::device::DeviceInner;

bitflags! {
    /// GPU-visible usage state of a resource.
    ///
    /// A resource must be transitioned with a barrier before the hardware may
    /// read or write it in a different state.
    pub struct ResourceStates: u32 {
        const COMMON           = 1 << 0;
        const RENDER_TARGET    = 1 << 1;
        const DEPTH_WRITE      = 1 << 2;
        const DEPTH_READ       = 1 << 3;
        const UNORDERED_ACCESS = 1 << 4;
        const SHADER_RESOURCE  = 1 << 5;
        const COPY_DEST        = 1 << 6;
        const COPY_SOURCE      = 1 << 7;
        const PRESENT          = 1 << 8;
    }
}

bitflags! {
    /// Creation flags of a resource.
    /// The resource must be created with the flag allowing a usage before
    /// any view of that usage kind can be created on it.
    pub struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET    = 1 << 0;
        const ALLOW_DEPTH_STENCIL    = 1 << 1;
        const ALLOW_UNORDERED_ACCESS = 1 << 2;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    Rg16Float,
    R32Float,
    R32Uint,
    D32Float,
    D24UnormS8Uint,
}

impl Format {
    pub fn bytes_per_texel(self) -> u64 {
        match self {
            Format::Unknown => 4,
            Format::Rgba8Unorm | Format::Bgra8Unorm => 4,
            Format::Rgba16Float => 8,
            Format::Rg16Float => 4,
            Format::R32Float | Format::R32Uint => 4,
            Format::D32Float | Format::D24UnormS8Uint => 4,
        }
    }
}

/// Optimized clear value baked into a resource at creation time.
#[derive(Clone, Copy, Debug)]
pub enum ClearValue {
    Color { format: Format, value: [f32; 4] },
    DepthStencil { format: Format, depth: f32, stencil: u8 },
}

// Clear values take part in the structural description resources are pooled
// by, so equality and hashing must be byte-exact over the float payloads.
impl PartialEq for ClearValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                ClearValue::Color { format: f0, value: v0 },
                ClearValue::Color { format: f1, value: v1 },
            ) => f0 == f1 && v0.iter().zip(v1).all(|(a, b)| a.to_bits() == b.to_bits()),
            (
                ClearValue::DepthStencil { format: f0, depth: d0, stencil: s0 },
                ClearValue::DepthStencil { format: f1, depth: d1, stencil: s1 },
            ) => f0 == f1 && d0.to_bits() == d1.to_bits() && s0 == s1,
            _ => false,
        }
    }
}

impl Eq for ClearValue {}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ClearValue::Color { format, value } => {
                format.hash(state);
                for v in value {
                    v.to_bits().hash(state);
                }
            }
            ClearValue::DepthStencil { format, depth, stencil } => {
                format.hash(state);
                depth.to_bits().hash(state);
                stencil.hash(state);
            }
        }
    }
}

/// Structural description of a GPU resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ResourceDesc {
    pub width: u32,
    pub height: u32,
    pub array_layers: u16,
    pub mip_levels: u16,
    pub format: Format,
    pub flags: ResourceFlags,
    pub clear_value: Option<ClearValue>,
}

impl ResourceDesc {
    pub fn tex2d(width: u32, height: u32, format: Format) -> Self {
        Self {
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            format,
            flags: ResourceFlags::empty(),
            clear_value: None,
        }
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }

    /// Approximate GPU memory footprint, used for device budget accounting.
    /// Mip chain overhead is ignored.
    pub fn approximate_size_bytes(&self) -> u64 {
        self.width as u64
            * self.height as u64
            * self.array_layers as u64
            * self.format.bytes_per_texel()
    }
}

/// An opaque GPU memory allocation.
///
/// The handle owns the allocation: dropping it returns the footprint to the
/// device budget. Identity is the creation id, never the description.
#[derive(Debug)]
pub struct Resource {
    pub(crate) id: u64,
    pub desc: ResourceDesc,
    pub(crate) device: Arc<DeviceInner>,
}

impl Resource {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.device.on_resource_destroyed(self.desc.approximate_size_bytes());
    }
}
