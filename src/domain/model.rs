use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_EXPOSED_PORT: u16 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadType {
    VirtualMachine,
    Database,
    WebService,
    Container,
    BatchJob,
}

impl FromStr for WorkloadType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VirtualMachine" => Ok(WorkloadType::VirtualMachine),
            "Database" => Ok(WorkloadType::Database),
            "WebService" => Ok(WorkloadType::WebService),
            "Container" => Ok(WorkloadType::Container),
            "BatchJob" => Ok(WorkloadType::BatchJob),
            other => Err(format!("Invalid workload type {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    #[default]
    NotDeployed,
    Deploying,
    Running,
    Stopped,
    Error,
}

impl DeploymentStatus {
    /// Statuses listed by the "my deployments" view.
    pub fn is_deployed(&self) -> bool {
        !matches!(self, DeploymentStatus::NotDeployed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub workload_type: WorkloadType,
    pub required_cpu: u32,
    pub required_memory: f64,
    pub required_storage: f64,
    pub container_image: Option<String>,
    pub exposed_port: u16,
    pub environment_variables: Option<String>,
    pub deployment_status: DeploymentStatus,
    pub container_id: Option<String>,
    pub access_url: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workload {
    pub fn new(owner_id: Uuid, spec: WorkloadSpec) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: spec.name,
            description: spec.description,
            workload_type: spec.workload_type,
            required_cpu: spec.required_cpu,
            required_memory: spec.required_memory,
            required_storage: spec.required_storage,
            container_image: spec.container_image,
            exposed_port: spec.exposed_port,
            environment_variables: spec.environment_variables,
            deployment_status: DeploymentStatus::NotDeployed,
            container_id: None,
            access_url: None,
            deployed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the declared fields, deployment state is left alone.
    pub fn apply(&mut self, spec: WorkloadSpec) {
        self.name = spec.name;
        self.description = spec.description;
        self.workload_type = spec.workload_type;
        self.required_cpu = spec.required_cpu;
        self.required_memory = spec.required_memory;
        self.required_storage = spec.required_storage;
        self.container_image = spec.container_image;
        self.exposed_port = spec.exposed_port;
        self.environment_variables = spec.environment_variables;
    }

    /// Image to deploy, `None` when the workload is not deployable.
    pub fn image(&self) -> Option<&str> {
        self.container_image
            .as_deref()
            .map(str::trim)
            .filter(|image| !image.is_empty())
    }

    pub fn live_container(&self) -> Option<&str> {
        self.container_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Deterministic container name, stable across redeploys of the same workload.
    pub fn container_name(&self) -> String {
        format!("{}{}", owner_tag(&self.owner_id), short_id(&self.id))
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn forget_deployment(&mut self) {
        self.deployment_status = DeploymentStatus::NotDeployed;
        self.container_id = None;
        self.access_url = None;
        self.deployed_at = None;
    }
}

/// Name prefix shared by every container of one owner.
pub fn owner_tag(owner_id: &Uuid) -> String {
    format!("workload-{}-", short_id(owner_id))
}

/// Docker `name` filter matching the owner tag at the start of a name only.
pub fn owner_name_filter(owner_id: &Uuid) -> String {
    format!("^/?{}", owner_tag(owner_id))
}

fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Validated declaration of a workload, used on create and update.
#[derive(Clone, Debug)]
pub struct WorkloadSpec {
    pub name: String,
    pub description: Option<String>,
    pub workload_type: WorkloadType,
    pub required_cpu: u32,
    pub required_memory: f64,
    pub required_storage: f64,
    pub container_image: Option<String>,
    pub exposed_port: u16,
    pub environment_variables: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub workload_type: String,
    pub required_cpu: i64,
    pub required_memory: f64,
    pub required_storage: f64,
    pub container_image: Option<String>,
    pub exposed_port: Option<i64>,
    pub environment_variables: Option<String>,
}

impl TryFrom<WorkloadRequest> for WorkloadSpec {
    type Error = String;

    fn try_from(request: WorkloadRequest) -> Result<Self, Self::Error> {
        let workload_type = request.workload_type.parse::<WorkloadType>()?;
        if request.name.trim().is_empty() {
            return Err("Workload name is required".to_string());
        }
        let required_cpu = u32::try_from(request.required_cpu)
            .ok()
            .filter(|cpu| *cpu > 0)
            .ok_or_else(|| "Required CPU must be a positive integer".to_string())?;
        if !(request.required_memory > 0.0) {
            return Err("Required memory must be positive".to_string());
        }
        if !(request.required_storage > 0.0) {
            return Err("Required storage must be positive".to_string());
        }
        let exposed_port = match request.exposed_port {
            None => DEFAULT_EXPOSED_PORT,
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| format!("Exposed port {} is out of range 1-65535", port))?,
        };
        Ok(WorkloadSpec {
            name: request.name,
            description: request.description,
            workload_type,
            required_cpu,
            required_memory: request.required_memory,
            required_storage: request.required_storage,
            container_image: request.container_image,
            exposed_port,
            environment_variables: request.environment_variables,
        })
    }
}

/// Runtime view of a container, as reported by the container engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub id: String,
    pub name: String,
    pub state: String,
    pub status: String,
    pub created: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
    pub ports: Vec<String>,
}

impl ContainerStatus {
    pub const NOT_FOUND: &'static str = "NotFound";

    pub fn not_found(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            state: Self::NOT_FOUND.to_string(),
            status: "Container not found or removed".to_string(),
            created: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            ports: vec![],
        }
    }

    pub fn is_gone(&self) -> bool {
        self.state == Self::NOT_FOUND
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvAssignment {
    pub key: String,
    pub value: String,
}

impl fmt::Display for EnvAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResourceLimits {
    pub memory_gb: f64,
    pub cpus: u32,
}

impl ResourceLimits {
    pub fn memory_megabytes(&self) -> i64 {
        (self.memory_gb * 1024.0).round() as i64
    }
}

/// Everything the runtime needs to start the container of one workload.
#[derive(Clone, Debug, PartialEq)]
pub struct RunRequest {
    pub name: String,
    pub host_port: u16,
    pub container_port: u16,
    pub image: String,
    pub env: Vec<EnvAssignment>,
    pub limits: Option<ResourceLimits>,
}
