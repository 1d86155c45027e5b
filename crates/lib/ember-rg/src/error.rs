use thiserror::Error;

use ember_rhi::backend::{Format, RhiError};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("pass '{pass}' references resource index {index} which was never declared")]
    UndeclaredResource { pass: String, index: u32 },

    #[error("resource index {index} is from graph generation {index_generation}, current generation is {current_generation}")]
    StaleResourceIndex {
        index: u32,
        index_generation: u32,
        current_generation: u32,
    },

    #[error("pass '{pass}' declares resource index {index} more than once")]
    DuplicateResourceUsage { pass: String, index: u32 },

    #[error("resource index {index} is viewed as both {first:?} and {second:?}")]
    ConflictingViewFormat {
        index: u32,
        first: Format,
        second: Format,
    },

    #[error("external resource index {index} was not bound before use")]
    ExternalResourceNotBound { index: u32 },

    #[error("resource index {index} is not an external resource")]
    NotAnExternalResource { index: u32 },

    #[error("no graph declaration in progress, call new_graph() first")]
    NoGraphInProgress,

    #[error("graph was not compiled, call compile() before execute()")]
    NotCompiled,

    #[error("pass '{pass}' failed during recording: {source}")]
    PassRecording {
        pass: String,
        #[source]
        source: RhiError,
    },

    #[error("worker thread panicked while recording pass commands")]
    WorkerPanicked,

    #[error(transparent)]
    Rhi(#[from] RhiError),
}
