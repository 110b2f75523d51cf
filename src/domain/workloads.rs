use log::{info, warn};
use uuid::Uuid;

use super::{
    error::{CleanupOutcome, DeploymentError},
    load,
    model::{Workload, WorkloadSpec},
    remove_by_name, ReconciliationService,
};

pub async fn create(
    owner_id: Uuid,
    spec: WorkloadSpec,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    let workload = Workload::new(owner_id, spec);
    service.workload_store.insert(workload.clone()).await?;
    info!("Workload {} created", workload.id);
    Ok(workload)
}

pub async fn get(
    id: Uuid,
    owner_id: Uuid,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    load(service, id, owner_id).await
}

pub async fn list(
    owner_id: Uuid,
    search: Option<&str>,
    service: &ReconciliationService,
) -> Result<Vec<Workload>, DeploymentError> {
    let search = search.map(str::trim).filter(|search| !search.is_empty());
    Ok(service.workload_store.list(&owner_id, search).await?)
}

/// Updates the declaration only, a running container keeps its current settings until redeployed.
pub async fn update(
    id: Uuid,
    owner_id: Uuid,
    spec: WorkloadSpec,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    let _guard = service.locks.try_acquire(id)?;
    let mut workload = load(service, id, owner_id).await?;
    workload.apply(spec);
    workload.touch();
    service.workload_store.save(&workload).await?;
    Ok(workload)
}

/// Deletes the record, container teardown never prevents it.
pub async fn delete(
    id: Uuid,
    owner_id: Uuid,
    service: &ReconciliationService,
) -> Result<(), DeploymentError> {
    let _guard = service.locks.try_acquire(id)?;
    let workload = load(service, id, owner_id).await?;
    match workload.live_container() {
        Some(container_id) => teardown(&workload, container_id, service).await,
        None if workload.deployment_status.is_deployed() => {
            remove_by_name(&workload, service).await
        }
        None => {}
    }
    if !service.workload_store.delete(&id, &owner_id).await? {
        return Err(DeploymentError::WorkloadNotFound(id));
    }
    info!("Workload {} deleted", id);
    Ok(())
}

async fn teardown(workload: &Workload, container_id: &str, service: &ReconciliationService) {
    if let Err(e) = service.container_runtime.stop(container_id).await {
        warn!(
            "Container cleanup failed for {} during deletion of workload {}: {}",
            container_id, workload.id, e
        );
    }
    let removed = service.container_runtime.force_remove(container_id).await;
    if let CleanupOutcome::Failed(failure) = removed {
        warn!(
            "Can't remove container {} of deleted workload {}: {}",
            failure.target, workload.id, failure.reason
        );
        remove_by_name(workload, service).await;
    }
}
