use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as EngineError,
    image::CreateImageOptions,
    secret::{ContainerInspectResponse, CreateImageInfo, HostConfig, PortBinding},
    Docker,
};
use futures::TryStreamExt;
use itertools::Itertools;
use log::{info, warn};
use map_macro::hash_map;
use uuid::Uuid;

use super::parse_timestamp;
use crate::domain::{
    error::{CleanupOutcome, RuntimeError},
    model::{owner_name_filter, ContainerStatus, RunRequest},
    port::ContainerRuntime,
};

const NAME_LABEL: &str = "workload-console.container";

/// Talks to the container engine over its API socket.
pub struct DockerApiRuntime {
    pub docker: Docker,
}

fn engine_error(e: EngineError) -> RuntimeError {
    RuntimeError::Engine(e.to_string())
}

fn is_missing(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerApiRuntime {
    async fn run(&self, request: &RunRequest) -> Result<String, RuntimeError> {
        self.ensure_image(&request.image).await?;

        let port_key = format!("{}/tcp", request.container_port);
        let config = Config {
            image: Some(request.image.clone()),
            env: Some(request.env.iter().map(ToString::to_string).collect()),
            exposed_ports: Some(hash_map! {
                port_key.clone() => HashMap::new()
            }),
            labels: Some(hash_map! {
                NAME_LABEL.to_string() => request.name.clone()
            }),
            host_config: Some(HostConfig {
                port_bindings: Some(hash_map! {
                    port_key => Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(request.host_port.to_string()),
                    }])
                }),
                memory: request
                    .limits
                    .map(|limits| limits.memory_megabytes() * 1024 * 1024),
                nano_cpus: request
                    .limits
                    .map(|limits| i64::from(limits.cpus) * 1_000_000_000),
                ..Default::default()
            }),
            ..Default::default()
        };
        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: request.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(engine_error)?;
        self.docker
            .start_container(container.id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_error)?;
        info!("Container {} started with id {}", request.name, container.id);
        Ok(container.id)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError> {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(to_status(container_id, response)),
            Err(e) if is_missing(&e) => Ok(ContainerStatus::not_found(container_id)),
            Err(e) => Err(engine_error(e)),
        }
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        if container_id.is_empty() {
            return Err(RuntimeError::EmptyContainerId);
        }
        info!("Stopping container {}", container_id);
        self.docker
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
            .map_err(engine_error)
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        if container_id.is_empty() {
            return Err(RuntimeError::EmptyContainerId);
        }
        match self.force_delete(container_id).await {
            Err(e) if !is_missing(&e) => Err(engine_error(e)),
            _ => {
                info!("Container {} removed", container_id);
                Ok(())
            }
        }
    }

    async fn force_remove(&self, container_id: &str) -> CleanupOutcome {
        self.remove_quietly(container_id).await
    }

    async fn force_remove_by_name(&self, container_name: &str) -> CleanupOutcome {
        info!("Force removing container by name {}", container_name);
        self.remove_quietly(container_name).await
    }

    async fn list_for_owner(&self, owner_id: &Uuid) -> Result<Vec<String>, RuntimeError> {
        let filter = owner_name_filter(owner_id);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: hash_map! {
                    "name" => vec![filter.as_str()]
                },
                ..Default::default()
            }))
            .await
            .map_err(engine_error)?;
        Ok(containers
            .into_iter()
            .filter_map(|container| container.id)
            .collect())
    }
}

impl DockerApiRuntime {
    /// Pulls the image when the engine does not have it yet, as `docker run` would.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        info!("Pull image {}", image);
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<CreateImageInfo>>()
            .await
            .map_err(engine_error)?;
        Ok(())
    }

    async fn force_delete(&self, target: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                target,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
    }

    async fn remove_quietly(&self, target: &str) -> CleanupOutcome {
        match self.force_delete(target).await {
            Ok(()) => {
                info!("Container {} force removed", target);
                CleanupOutcome::Removed
            }
            Err(e) if is_missing(&e) => CleanupOutcome::Removed,
            Err(e) => {
                warn!("Failed to force remove container {}: {}", target, e);
                CleanupOutcome::failed(target, e)
            }
        }
    }
}

fn to_status(container_id: &str, response: ContainerInspectResponse) -> ContainerStatus {
    let state = response.state.unwrap_or_default();
    let status = state
        .status
        .map(|status| status.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let ports = response
        .network_settings
        .and_then(|settings| settings.ports)
        .into_iter()
        .flat_map(|ports| ports.into_values())
        .flatten()
        .flatten()
        .filter_map(|binding| binding.host_port)
        .filter(|port| !port.is_empty())
        .unique()
        .sorted()
        .collect();
    ContainerStatus {
        id: response.id.unwrap_or_else(|| container_id.to_string()),
        name: response
            .name
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        state: status.clone(),
        status,
        created: response.created.as_deref().and_then(parse_timestamp),
        started_at: state.started_at.as_deref().and_then(parse_timestamp),
        finished_at: state.finished_at.as_deref().and_then(parse_timestamp),
        exit_code: state.exit_code,
        error: state.error.filter(|error| !error.is_empty()),
        ports,
    }
}
