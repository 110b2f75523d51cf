//! Recording runtime and service wiring shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    error::{CleanupOutcome, RuntimeError},
    model::{owner_tag, ContainerStatus, RunRequest, Workload, WorkloadRequest, WorkloadSpec},
    port::{ContainerRuntime, PortAllocator},
    workloads, DeploymentSettings, ReconciliationService, WorkloadLocks,
};
use crate::infra::memory::InMemoryWorkloadStore;

#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeCall {
    Run(RunRequest),
    Inspect(String),
    Stop(String),
    Remove(String),
    ForceRemove(String),
    ForceRemoveByName(String),
    ListForOwner(Uuid),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Run,
    /// The container is created under its name, then fails to start.
    Start,
    Stop,
    Remove,
    ForceRemove,
    ForceRemoveByName,
}

#[derive(Default)]
struct State {
    calls: Vec<RuntimeCall>,
    failing: HashSet<Op>,
    created: usize,
    // container id -> (name, state)
    containers: HashMap<String, (String, String)>,
}

/// Fake container runtime keeping a call log, with scriptable failures.
/// Like docker, it refuses to create a second container under a name in use.
#[derive(Clone, Default)]
pub struct RecordingRuntime {
    state: Arc<Mutex<State>>,
}

impl RecordingRuntime {
    pub fn fail(&self, op: Op) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn restore(&self, op: Op) {
        self.state.lock().unwrap().failing.remove(&op);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn run_requests(&self) -> Vec<RunRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RuntimeCall::Run(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: RuntimeCall, op: Option<Op>) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match op {
            Some(op) if state.failing.contains(&op) => Err(RuntimeError::CommandFailed {
                command: format!("docker {:?}", op),
                exit_code: Some(1),
                stderr: "simulated failure".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn run(&self, request: &RunRequest) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::Run(request.clone()), Some(Op::Run))?;
        let mut state = self.state.lock().unwrap();
        if state.containers.values().any(|(name, _)| *name == request.name) {
            return Err(RuntimeError::CommandFailed {
                command: "docker run".to_string(),
                exit_code: Some(125),
                stderr: format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    request.name
                ),
            });
        }
        state.created += 1;
        let id = format!("container-{}", state.created);
        if state.failing.contains(&Op::Start) {
            state
                .containers
                .insert(id, (request.name.clone(), "created".to_string()));
            return Err(RuntimeError::CommandFailed {
                command: "docker run".to_string(),
                exit_code: Some(125),
                stderr: "port is already allocated".to_string(),
            });
        }
        state
            .containers
            .insert(id.clone(), (request.name.clone(), "running".to_string()));
        Ok(format!(" {}\n", id))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError> {
        self.record(RuntimeCall::Inspect(container_id.to_string()), None)?;
        let state = self.state.lock().unwrap();
        Ok(match state.containers.get(container_id) {
            Some((name, container_state)) => ContainerStatus {
                name: name.clone(),
                state: container_state.clone(),
                status: container_state.clone(),
                ..ContainerStatus::not_found(container_id)
            },
            None => ContainerStatus::not_found(container_id),
        })
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Stop(container_id.to_string()), Some(Op::Stop))?;
        if let Some(container) = self.state.lock().unwrap().containers.get_mut(container_id) {
            container.1 = "exited".to_string();
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove(container_id.to_string()), Some(Op::Remove))?;
        self.state.lock().unwrap().containers.remove(container_id);
        Ok(())
    }

    async fn force_remove(&self, container_id: &str) -> CleanupOutcome {
        match self.record(
            RuntimeCall::ForceRemove(container_id.to_string()),
            Some(Op::ForceRemove),
        ) {
            Ok(()) => {
                self.state.lock().unwrap().containers.remove(container_id);
                CleanupOutcome::Removed
            }
            Err(e) => CleanupOutcome::failed(container_id, e),
        }
    }

    async fn force_remove_by_name(&self, container_name: &str) -> CleanupOutcome {
        match self.record(
            RuntimeCall::ForceRemoveByName(container_name.to_string()),
            Some(Op::ForceRemoveByName),
        ) {
            Ok(()) => {
                self.state
                    .lock()
                    .unwrap()
                    .containers
                    .retain(|_, (name, _)| name != container_name);
                CleanupOutcome::Removed
            }
            Err(e) => CleanupOutcome::failed(container_name, e),
        }
    }

    async fn list_for_owner(&self, owner_id: &Uuid) -> Result<Vec<String>, RuntimeError> {
        self.record(RuntimeCall::ListForOwner(*owner_id), None)?;
        let prefix = owner_tag(owner_id);
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, (name, _))| name.starts_with(&prefix))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Hands out increasing ports so every deploy gets a distinct one.
pub struct SequentialPorts(AtomicU16);

impl PortAllocator for SequentialPorts {
    fn allocate(&self) -> u16 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

pub fn service(runtime: RecordingRuntime) -> ReconciliationService {
    ReconciliationService {
        workload_store: Box::new(InMemoryWorkloadStore::default()),
        container_runtime: Box::new(runtime),
        port_allocator: Box::new(SequentialPorts(AtomicU16::new(20000))),
        settings: DeploymentSettings {
            public_host: "localhost".to_string(),
            default_image: "nginx:alpine".to_string(),
            resource_limits: false,
        },
        locks: WorkloadLocks::default(),
    }
}

pub fn web_request(image: Option<&str>) -> WorkloadRequest {
    WorkloadRequest {
        name: "web1".to_string(),
        description: None,
        workload_type: "WebService".to_string(),
        required_cpu: 1,
        required_memory: 1.0,
        required_storage: 5.0,
        container_image: image.map(str::to_string),
        exposed_port: Some(80),
        environment_variables: None,
    }
}

pub async fn create_workload(
    service: &ReconciliationService,
    owner_id: Uuid,
    image: Option<&str>,
) -> Workload {
    let spec = WorkloadSpec::try_from(web_request(image)).unwrap();
    workloads::create(owner_id, spec, service).await.unwrap()
}
