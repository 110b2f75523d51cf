use anyhow::Error;
use async_trait::async_trait;
use uuid::Uuid;

use super::{
    error::{CleanupOutcome, RuntimeError},
    model::{ContainerStatus, RunRequest, Workload},
};

/// Capabilities the deployment lifecycle needs from a container engine.
#[async_trait]
pub trait ContainerRuntime {
    /// Starts a detached container and returns the engine assigned id.
    async fn run(&self, request: &RunRequest) -> Result<String, RuntimeError>;

    /// A container the engine does not know yields a `NotFound` status, not an error.
    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError>;

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn force_remove(&self, container_id: &str) -> CleanupOutcome;

    async fn force_remove_by_name(&self, container_name: &str) -> CleanupOutcome;

    async fn list_for_owner(&self, owner_id: &Uuid) -> Result<Vec<String>, RuntimeError>;
}

/// Persistence of workload records, every lookup is scoped by owner.
#[async_trait]
pub trait WorkloadStore {
    async fn insert(&self, workload: Workload) -> Result<(), Error>;

    async fn find(&self, id: &Uuid, owner_id: &Uuid) -> Result<Option<Workload>, Error>;

    /// Most recently updated first, optionally filtered on a name substring.
    async fn list(&self, owner_id: &Uuid, search: Option<&str>) -> Result<Vec<Workload>, Error>;

    async fn save(&self, workload: &Workload) -> Result<(), Error>;

    async fn delete(&self, id: &Uuid, owner_id: &Uuid) -> Result<bool, Error>;
}

pub trait PortAllocator {
    /// Advisory only, nothing holds the port once it is returned.
    fn allocate(&self) -> u16;
}
