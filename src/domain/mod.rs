use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use error::{CleanupOutcome, DeploymentError, RuntimeError};
use log::{error, info, warn};
use model::{ContainerStatus, DeploymentStatus, ResourceLimits, RunRequest, Workload};
use port::{ContainerRuntime, PortAllocator, WorkloadStore};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

pub mod environment;
pub mod error;
pub mod model;
pub mod port;
#[cfg(test)]
pub mod testing;
pub mod workloads;

#[derive(Clone, Debug)]
pub struct DeploymentSettings {
    pub public_host: String,
    pub default_image: String,
    pub resource_limits: bool,
}

pub struct ReconciliationService {
    pub workload_store: Box<dyn WorkloadStore + 'static + Sync + Send>,
    pub container_runtime: Box<dyn ContainerRuntime + 'static + Sync + Send>,
    pub port_allocator: Box<dyn PortAllocator + 'static + Sync + Send>,
    pub settings: DeploymentSettings,
    pub locks: WorkloadLocks,
}

/// One exclusive lock per workload, held for the whole of a mutating operation.
///
/// An entry only exists while a [`WorkloadGuard`] for it is alive. Lock handles are
/// cloned and released under the registry mutex, so the reference count tells whether
/// anyone else still uses the entry.
#[derive(Default)]
pub struct WorkloadLocks {
    inner: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

pub struct WorkloadGuard<'a> {
    locks: &'a WorkloadLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl WorkloadLocks {
    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<Mutex<()>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails with `Busy` instead of waiting when the workload is already locked.
    pub fn try_acquire(&self, id: Uuid) -> Result<WorkloadGuard<'_>, DeploymentError> {
        let mut registry = self.registry();
        let guard = registry
            .entry(id)
            .or_default()
            .clone()
            .try_lock_owned()
            .map_err(|_| DeploymentError::Busy(id))?;
        Ok(WorkloadGuard {
            locks: self,
            id,
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    pub fn entries(&self) -> usize {
        self.registry().len()
    }
}

impl Drop for WorkloadGuard<'_> {
    fn drop(&mut self) {
        let mut registry = self.locks.registry();
        drop(self.guard.take());
        if registry
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            registry.remove(&self.id);
        }
    }
}

pub enum Event {
    Deploy(Uuid),
    Stop(Uuid),
    Remove(Uuid),
}

/// Drives one lifecycle transition and returns the persisted workload.
pub async fn reconcile(
    event: Event,
    owner_id: Uuid,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    match event {
        Event::Deploy(id) => {
            let _guard = service.locks.try_acquire(id)?;
            deploy(load(service, id, owner_id).await?, service).await
        }
        Event::Stop(id) => {
            let _guard = service.locks.try_acquire(id)?;
            stop(load(service, id, owner_id).await?, service).await
        }
        Event::Remove(id) => {
            let _guard = service.locks.try_acquire(id)?;
            remove(load(service, id, owner_id).await?, service).await
        }
    }
}

pub(crate) async fn load(
    service: &ReconciliationService,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Workload, DeploymentError> {
    service
        .workload_store
        .find(&id, &owner_id)
        .await?
        .ok_or(DeploymentError::WorkloadNotFound(id))
}

async fn persist(
    service: &ReconciliationService,
    workload: &mut Workload,
) -> Result<(), DeploymentError> {
    workload.touch();
    service.workload_store.save(workload).await?;
    Ok(())
}

async fn deploy(
    mut workload: Workload,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    if workload.image().is_none() {
        return Err(DeploymentError::ImageRequired);
    }

    // Persisted before touching the runtime so a crash leaves a visible Deploying record
    workload.deployment_status = DeploymentStatus::Deploying;
    workload.deployed_at = Some(Utc::now());
    persist(service, &mut workload).await?;
    info!("Deploying workload {}", workload.id);

    match workload.live_container().map(str::to_string) {
        Some(stale) => dispose_stale_container(&workload, &stale, service).await,
        // A start failure or a crash before the id was saved leaves an unrecorded container
        None => remove_by_name(&workload, service).await,
    }
    workload.container_id = None;
    workload.access_url = None;

    match start_container(&workload, service).await {
        Ok((container_id, access_url)) => {
            info!(
                "Workload {} running in container {} at {}",
                workload.id, container_id, access_url
            );
            workload.container_id = Some(container_id);
            workload.access_url = Some(access_url);
            workload.deployment_status = DeploymentStatus::Running;
            persist(service, &mut workload).await?;
            Ok(workload)
        }
        Err(e) => {
            error!("Failed to deploy workload {}: {}", workload.id, e);
            workload.deployment_status = DeploymentStatus::Error;
            if let Err(store_error) = persist(service, &mut workload).await {
                error!(
                    "Can't record deployment failure of workload {}: {}",
                    workload.id, store_error
                );
            }
            Err(e.into())
        }
    }
}

/// Removes the container of a previous deployment, by id first and by name as a second chance.
async fn dispose_stale_container(
    workload: &Workload,
    container_id: &str,
    service: &ReconciliationService,
) {
    info!(
        "Removing old container {} of workload {} before redeploy",
        container_id, workload.id
    );
    let removed = service.container_runtime.force_remove(container_id).await;
    if let CleanupOutcome::Failed(failure) = removed {
        warn!(
            "Failed to remove old container {} ({}), trying by name",
            failure.target, failure.reason
        );
        remove_by_name(workload, service).await;
    }
}

/// Best-effort removal of whatever container holds the workload's deterministic name.
pub(crate) async fn remove_by_name(workload: &Workload, service: &ReconciliationService) {
    let name = workload.container_name();
    if let CleanupOutcome::Failed(failure) =
        service.container_runtime.force_remove_by_name(&name).await
    {
        warn!(
            "Failed to remove container by name {} of workload {}: {}",
            failure.target, workload.id, failure.reason
        );
    }
}

async fn start_container(
    workload: &Workload,
    service: &ReconciliationService,
) -> Result<(String, String), RuntimeError> {
    let host_port = service.port_allocator.allocate();
    let request = RunRequest {
        name: workload.container_name(),
        host_port,
        container_port: workload.exposed_port,
        image: workload
            .image()
            .unwrap_or(service.settings.default_image.as_str())
            .to_string(),
        env: environment::resolve(workload.environment_variables.as_deref()),
        limits: service.settings.resource_limits.then_some(ResourceLimits {
            memory_gb: workload.required_memory,
            cpus: workload.required_cpu,
        }),
    };
    let container_id = service.container_runtime.run(&request).await?;
    Ok((
        container_id.trim().to_string(),
        format!("http://{}:{}", service.settings.public_host, host_port),
    ))
}

async fn stop(
    mut workload: Workload,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    let container_id = match workload.live_container() {
        Some(id) if workload.deployment_status.is_deployed() => id.to_string(),
        _ => return Err(DeploymentError::ContainerNotFound(workload.id)),
    };
    info!("Stopping container {} of workload {}", container_id, workload.id);
    if let Err(e) = service.container_runtime.stop(&container_id).await {
        error!(
            "Failed to stop container {} of workload {}: {}",
            container_id, workload.id, e
        );
        return Err(e.into());
    }
    workload.deployment_status = DeploymentStatus::Stopped;
    persist(service, &mut workload).await?;
    Ok(workload)
}

async fn remove(
    mut workload: Workload,
    service: &ReconciliationService,
) -> Result<Workload, DeploymentError> {
    match workload.live_container().map(str::to_string) {
        Some(container_id) => {
            if let Err(e) = service.container_runtime.remove(&container_id).await {
                warn!(
                    "Failed to remove container {} of workload {}, forgetting it anyway: {}",
                    container_id, workload.id, e
                );
            }
        }
        None if workload.deployment_status.is_deployed() => {
            info!(
                "Workload {} is {} without container, resetting deployment",
                workload.id, workload.deployment_status
            );
            remove_by_name(&workload, service).await;
        }
        None => return Err(DeploymentError::ContainerNotFound(workload.id)),
    }
    workload.forget_deployment();
    persist(service, &mut workload).await?;
    info!("Deployment of workload {} removed", workload.id);
    Ok(workload)
}

pub async fn deployment_status(
    id: Uuid,
    owner_id: Uuid,
    service: &ReconciliationService,
) -> Result<ContainerStatus, DeploymentError> {
    let workload = load(service, id, owner_id).await?;
    let container_id = workload
        .live_container()
        .ok_or(DeploymentError::ContainerNotFound(id))?;
    let status = service
        .container_runtime
        .inspect(container_id)
        .await
        .map_err(|e| {
            error!("Failed to get status for container {}: {}", container_id, e);
            DeploymentError::from(e)
        })?;
    if status.is_gone() {
        warn!(
            "Container {} of workload {} no longer exists",
            container_id, workload.id
        );
    }
    Ok(status)
}

pub async fn list_deployments(
    owner_id: Uuid,
    service: &ReconciliationService,
) -> Result<Vec<Workload>, DeploymentError> {
    Ok(service
        .workload_store
        .list(&owner_id, None)
        .await?
        .into_iter()
        .filter(|workload| workload.deployment_status.is_deployed())
        .collect())
}

pub async fn list_containers(
    owner_id: Uuid,
    service: &ReconciliationService,
) -> Result<Vec<String>, DeploymentError> {
    Ok(service.container_runtime.list_for_owner(&owner_id).await?)
}
