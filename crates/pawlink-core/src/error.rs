use thiserror::Error;

use crate::store::StoreError;

/// Operation-level failures caught at the dispatcher boundary. None of these
/// terminate the connection; each becomes a scoped error reply to the
/// originating connection only.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not a participant of this conversation")]
    AccessDenied,
    #[error("conversation store call failed: {0}")]
    Upstream(#[from] StoreError),
    #[error("broker publish failed: {0}")]
    Broker(String),
    #[error("malformed event: {0}")]
    Decode(String),
}
