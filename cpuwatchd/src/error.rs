use thiserror::Error;

/// A non-fatal problem met while evaluating one snapshot.
///
/// None of these stop the poll loop; they are collected into the
/// evaluation report and logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("malformed host metrics: {reason}")]
    MalformedHost { reason: String },

    #[error("malformed process record pid={pid}: {reason}")]
    MalformedProcess { pid: u32, reason: String },

    #[error("malformed vm record {name:?}: {reason}")]
    MalformedVm { name: String, reason: String },

    #[error("sink {sink} failed for {key}: {reason}")]
    SinkFailed {
        sink: &'static str,
        key: String,
        reason: String,
    },

    #[error("sink {sink} timed out for {key}")]
    SinkTimeout { sink: &'static str, key: String },
}

impl EvalError {
    pub fn is_sink_failure(&self) -> bool {
        matches!(self, Self::SinkFailed { .. } | Self::SinkTimeout { .. })
    }
}
