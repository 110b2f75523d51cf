use std::collections::HashMap;

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{model::Workload, port::WorkloadStore};

/// Process local workload records, lost on restart.
#[derive(Default)]
pub struct InMemoryWorkloadStore {
    workloads: RwLock<HashMap<Uuid, Workload>>,
}

#[async_trait]
impl WorkloadStore for InMemoryWorkloadStore {
    async fn insert(&self, workload: Workload) -> Result<(), Error> {
        let mut workloads = self.workloads.write().await;
        if workloads.contains_key(&workload.id) {
            return Err(anyhow!("Workload {} already exists", workload.id));
        }
        workloads.insert(workload.id, workload);
        Ok(())
    }

    async fn find(&self, id: &Uuid, owner_id: &Uuid) -> Result<Option<Workload>, Error> {
        Ok(self
            .workloads
            .read()
            .await
            .get(id)
            .filter(|workload| workload.owner_id == *owner_id)
            .cloned())
    }

    async fn list(&self, owner_id: &Uuid, search: Option<&str>) -> Result<Vec<Workload>, Error> {
        let search = search.map(str::to_lowercase);
        let mut workloads: Vec<Workload> = self
            .workloads
            .read()
            .await
            .values()
            .filter(|workload| workload.owner_id == *owner_id)
            .filter(|workload| match search {
                Some(ref search) => workload.name.to_lowercase().contains(search),
                None => true,
            })
            .cloned()
            .collect();
        workloads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(workloads)
    }

    async fn save(&self, workload: &Workload) -> Result<(), Error> {
        match self.workloads.write().await.get_mut(&workload.id) {
            Some(stored) if stored.owner_id == workload.owner_id => {
                *stored = workload.clone();
                Ok(())
            }
            _ => Err(anyhow!("Workload {} does not exist", workload.id)),
        }
    }

    async fn delete(&self, id: &Uuid, owner_id: &Uuid) -> Result<bool, Error> {
        let mut workloads = self.workloads.write().await;
        match workloads.get(id) {
            Some(workload) if workload.owner_id == *owner_id => {
                workloads.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
