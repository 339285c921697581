//! Routing a mutation to the service call matching its target.

use fleet_core::{
    AssignmentService, AssignmentTarget, MachineName, OperationResponse, ServiceError,
    ServiceResult,
};

/// Assign `machines` to a cluster or clone target.
pub async fn dispatch_assign(
    service: &dyn AssignmentService,
    target: &AssignmentTarget,
    machines: &[MachineName],
    team: &str,
) -> ServiceResult<OperationResponse> {
    match target {
        AssignmentTarget::Cluster { name } => service.assign_to_cluster(machines, name).await,
        AssignmentTarget::Clone(clone) => service.assign_to_clone(machines, clone, team).await,
        AssignmentTarget::Image { .. } => Err(ServiceError::rejected(
            "image targets are moved with reassign_image",
        )),
    }
}

/// Remove `machines` from a cluster or clone target.
pub async fn dispatch_remove(
    service: &dyn AssignmentService,
    target: &AssignmentTarget,
    machines: &[MachineName],
    team: &str,
) -> ServiceResult<OperationResponse> {
    match target {
        AssignmentTarget::Cluster { .. } => service.remove_from_cluster(machines).await,
        AssignmentTarget::Clone(clone) => service.remove_from_clone(machines, clone, team).await,
        AssignmentTarget::Image { .. } => Err(ServiceError::rejected(
            "images are released with reassign_image",
        )),
    }
}

/// Collapse a mutating call into success or an error message.
pub fn succeeded(response: ServiceResult<OperationResponse>, fallback: &str) -> Result<(), String> {
    match response {
        Ok(resp) if resp.success => Ok(()),
        Ok(resp) => Err(resp.message_or(fallback)),
        Err(e) => Err(e.to_string()),
    }
}
