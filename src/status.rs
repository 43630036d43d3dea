use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::ContentStore;

/// Operation type recorded by the media-analysis pipeline.
pub const VIDEO_ANALYSIS: &str = "video_analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Done,
}

impl OperationState {
    pub fn is_done(self) -> bool {
        self == OperationState::Done
    }
}

impl From<bool> for OperationState {
    fn from(is_done: bool) -> Self {
        if is_done {
            OperationState::Done
        } else {
            OperationState::Pending
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Pending => f.write_str("pending"),
            OperationState::Done => f.write_str("done"),
        }
    }
}

/// Per-operation-type `pending`/`done` flag that callers poll.
///
/// "Done" means the operation is no longer running, not that it succeeded.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn ContentStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    /// Current state; an operation type that never ran is `Pending`.
    pub async fn state(&self, operation_type: &str) -> Result<OperationState> {
        let row = self.store.get_operation_status(operation_type).await?;
        Ok(row.map(|r| r.is_done).unwrap_or(false).into())
    }

    pub async fn is_done(&self, operation_type: &str) -> Result<bool> {
        Ok(self.state(operation_type).await?.is_done())
    }

    pub async fn mark_pending(&self, operation_type: &str) -> Result<()> {
        self.set(operation_type, OperationState::Pending).await
    }

    pub async fn mark_done(&self, operation_type: &str) -> Result<()> {
        self.set(operation_type, OperationState::Done).await
    }

    /// Force a state directly. Used by the operational override endpoint.
    pub async fn set(&self, operation_type: &str, state: OperationState) -> Result<()> {
        debug!(operation = operation_type, %state, "setting operation status");
        self.store
            .set_operation_status(operation_type, state.is_done())
            .await?;
        Ok(())
    }
}
