use thiserror::Error;

use crate::types::DeviceIndex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("device index {index} out of range (have {count} devices)")]
    InvalidIndex { index: DeviceIndex, count: usize },
    #[error("input index {index} out of range (have {count} inputs)")]
    InvalidInput { index: usize, count: usize },
    #[error("raw sample {raw} outside 0..={max}")]
    InvalidSample { raw: i32, max: i32 },
    #[error("invalid schedule: {0}")]
    InvalidSchedule(&'static str),
}
