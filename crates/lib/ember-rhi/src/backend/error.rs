use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RhiError {
    #[error("out of descriptors: requested {requested} from sub-heap with {available} free")]
    OutOfDescriptors { requested: u32, available: u32 },

    #[error("out of device memory: requested {requested_bytes} bytes, {available_bytes} bytes left in budget")]
    OutOfDeviceMemory {
        requested_bytes: u64,
        available_bytes: u64,
    },

    #[error("device lost: fence value {value} not reached after {waited:?}")]
    DeviceLost { value: u64, waited: Duration },

    #[error("command list is not in the recording state")]
    CommandListNotRecording,

    #[error("command list must be closed before submission")]
    CommandListNotClosed,

    #[error("descriptor range does not belong to this sub-heap")]
    ForeignDescriptorRange,
}
