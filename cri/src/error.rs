//! CRI-specific error conversions.

use a3s_pod_core::error::PodError;
use tonic::Status;

/// Wrap a gRPC status with the CRI operation and the target it was issued for.
pub fn status_to_pod_error(operation: &str, target: &str, status: Status) -> PodError {
    let operation = if target.is_empty() {
        operation.to_string()
    } else {
        format!("{} {}", operation, target)
    };
    PodError::cri(operation, status)
}

/// Reject an empty identifier before anything goes on the wire.
pub fn require_id(operation: &str, id: &str) -> Result<(), PodError> {
    if id.is_empty() {
        return Err(PodError::Validation(format!(
            "{}: id can't be empty",
            operation
        )));
    }
    Ok(())
}
