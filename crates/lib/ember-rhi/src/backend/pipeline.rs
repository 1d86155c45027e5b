#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

/// A compiled pipeline state object. Shader compilation is out of scope;
/// the handle only carries identity and flavor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PipelineState {
    pub(crate) id: u64,
    pub(crate) root_signature: u64,
    pub kind: PipelineKind,
}

impl PipelineState {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root_signature(&self) -> u64 {
        self.root_signature
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_extent(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn from_extent(width: i32, height: i32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width,
            bottom: height,
        }
    }
}
