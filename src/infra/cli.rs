use std::{collections::HashMap, process::Stdio};

use async_trait::async_trait;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::process::Command;
use uuid::Uuid;

use super::parse_timestamp;
use crate::domain::{
    error::{CleanupOutcome, RuntimeError},
    model::{owner_name_filter, ContainerStatus, RunRequest},
    port::ContainerRuntime,
};

/// Drives the container engine through its command line client.
pub struct DockerCliRuntime {
    pub binary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn reports_missing(&self) -> bool {
        self.stderr.contains("No such container") || self.stderr.contains("No such object")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn run(&self, request: &RunRequest) -> Result<String, RuntimeError> {
        let args = run_args(request);
        info!("Starting container {}: {} {}", request.name, self.binary, args.join(" "));
        let output = self.exec_checked(&args).await?;
        let container_id = output.stdout.trim().to_string();
        info!("Container {} started with id {}", request.name, container_id);
        Ok(container_id)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, RuntimeError> {
        let output = self.exec(&["inspect".to_string(), container_id.to_string()]).await?;
        if output.success() {
            parse_inspect(container_id, &output.stdout)
        } else if output.reports_missing() {
            Ok(ContainerStatus::not_found(container_id))
        } else {
            Err(self.failure(&["inspect"], output))
        }
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        if container_id.is_empty() {
            return Err(RuntimeError::EmptyContainerId);
        }
        info!("Stopping container {}", container_id);
        self.exec_checked(&["stop".to_string(), container_id.to_string()])
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError> {
        if container_id.is_empty() {
            return Err(RuntimeError::EmptyContainerId);
        }
        let output = self.exec(&rm_args(container_id)).await?;
        if output.success() || output.reports_missing() {
            info!("Container {} removed", container_id);
            Ok(())
        } else {
            Err(self.failure(&["rm", "-f"], output))
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
        let output = self.exec_checked(&list_args(owner_id)).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl DockerCliRuntime {
    pub async fn exec(&self, args: &[String]) -> Result<CommandOutput, RuntimeError> {
        debug!("Executing {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    async fn exec_checked(&self, args: &[String]) -> Result<CommandOutput, RuntimeError> {
        let output = self.exec(args).await?;
        if output.success() {
            Ok(output)
        } else {
            let subcommand = args.first().map(String::as_str).unwrap_or_default();
            Err(self.failure(&[subcommand], output))
        }
    }

    fn failure(&self, subcommand: &[&str], output: CommandOutput) -> RuntimeError {
        RuntimeError::CommandFailed {
            command: format!("{} {}", self.binary, subcommand.join(" ")),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }
    }

    async fn remove_quietly(&self, target: &str) -> CleanupOutcome {
        match self.exec(&rm_args(target)).await {
            Ok(output) if output.success() || output.reports_missing() => {
                info!("Container {} force removed", target);
                CleanupOutcome::Removed
            }
            Ok(output) => {
                warn!(
                    "Failed to force remove container {}: {}",
                    target,
                    output.stderr.trim()
                );
                CleanupOutcome::failed(target, output.stderr.trim())
            }
            Err(e) => {
                warn!("Exception while force removing container {}: {}", target, e);
                CleanupOutcome::failed(target, e)
            }
        }
    }
}

fn rm_args(target: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), target.to_string()]
}

pub fn list_args(owner_id: &Uuid) -> Vec<String> {
    vec![
        "ps".to_string(),
        "-a".to_string(),
        "--filter".to_string(),
        format!("name={}", owner_name_filter(owner_id)),
        "--format".to_string(),
        "{{.ID}}".to_string(),
    ]
}

/// Arguments of the detached `run` call, each value is its own argv entry so no quoting is needed.
pub fn run_args(request: &RunRequest) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        request.name.clone(),
        "-p".to_string(),
        format!("{}:{}", request.host_port, request.container_port),
    ];
    for assignment in &request.env {
        args.push("-e".to_string());
        args.push(assignment.to_string());
    }
    if let Some(limits) = request.limits {
        args.push("--memory".to_string());
        args.push(format!("{}m", limits.memory_megabytes()));
        args.push("--cpus".to_string());
        args.push(limits.cpus.to_string());
    }
    args.push(request.image.clone());
    args
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    created: Option<String>,
    state: InspectedState,
    network_settings: Option<InspectedNetwork>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    status: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    exit_code: Option<i64>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedNetwork {
    ports: Option<HashMap<String, Option<Vec<InspectedBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedBinding {
    host_port: Option<String>,
}

pub fn parse_inspect(container_id: &str, stdout: &str) -> Result<ContainerStatus, RuntimeError> {
    let containers: Vec<InspectedContainer> = serde_json::from_str(stdout)?;
    let Some(container) = containers.into_iter().next() else {
        return Ok(ContainerStatus::not_found(container_id));
    };
    let ports = container
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
    Ok(ContainerStatus {
        id: container.id,
        name: container.name.trim_start_matches('/').to_string(),
        state: container.state.status.clone(),
        status: container.state.status,
        created: container.created.as_deref().and_then(parse_timestamp),
        started_at: container.state.started_at.as_deref().and_then(parse_timestamp),
        finished_at: container.state.finished_at.as_deref().and_then(parse_timestamp),
        exit_code: container.state.exit_code,
        error: container.state.error.filter(|error| !error.is_empty()),
        ports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{EnvAssignment, ResourceLimits};

    const INSPECT_OUTPUT: &str = r#"[
      {
        "Id": "4f1c2d9e",
        "Created": "2025-03-01T10:00:00.123456789Z",
        "Name": "/workload-0a1b2c3d-9f8e7d6c",
        "State": {
          "Status": "running",
          "Running": true,
          "ExitCode": 0,
          "Error": "",
          "StartedAt": "2025-03-01T10:00:01.5Z",
          "FinishedAt": "0001-01-01T00:00:00Z"
        },
        "NetworkSettings": {
          "Ports": {
            "80/tcp": [
              { "HostIp": "0.0.0.0", "HostPort": "49153" },
              { "HostIp": "::", "HostPort": "49153" }
            ],
            "443/tcp": null
          }
        }
      }
    ]"#;

    fn request() -> RunRequest {
        RunRequest {
            name: "workload-0a1b2c3d-9f8e7d6c".to_string(),
            host_port: 49153,
            container_port: 80,
            image: "nginx:alpine".to_string(),
            env: vec![EnvAssignment {
                key: "GREETING".to_string(),
                value: "hello world".to_string(),
            }],
            limits: None,
        }
    }

    #[test]
    fn run_args_bind_port_and_pass_env_verbatim() {
        assert_eq!(
            run_args(&request()),
            vec![
                "run",
                "-d",
                "--name",
                "workload-0a1b2c3d-9f8e7d6c",
                "-p",
                "49153:80",
                "-e",
                "GREETING=hello world",
                "nginx:alpine"
            ]
        );
    }

    #[test]
    fn owner_listing_filters_on_anchored_name_prefix() {
        let owner = Uuid::parse_str("0a1b2c3d-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            list_args(&owner),
            vec![
                "ps",
                "-a",
                "--filter",
                "name=^/?workload-0a1b2c3d-",
                "--format",
                "{{.ID}}"
            ]
        );
    }

    #[test]
    fn run_args_carry_limits_before_image() {
        let mut request = request();
        request.env.clear();
        request.limits = Some(ResourceLimits {
            memory_gb: 0.5,
            cpus: 2,
        });
        let args = run_args(&request);
        assert_eq!(
            &args[6..],
            &["--memory", "512m", "--cpus", "2", "nginx:alpine"]
        );
    }

    #[test]
    fn inspect_output_is_mapped() {
        let status = parse_inspect("4f1c2d9e", INSPECT_OUTPUT).unwrap();
        assert_eq!(status.id, "4f1c2d9e");
        assert_eq!(status.name, "workload-0a1b2c3d-9f8e7d6c");
        assert_eq!(status.state, "running");
        assert!(status.created.is_some());
        assert!(status.started_at.is_some());
        assert!(status.finished_at.is_none());
        assert_eq!(status.exit_code, Some(0));
        assert_eq!(status.error, None);
        assert_eq!(status.ports, vec!["49153".to_string()]);
    }

    #[test]
    fn empty_inspect_output_is_not_found() {
        let status = parse_inspect("gone", "[]").unwrap();
        assert!(status.is_gone());
    }

    #[test]
    fn garbage_inspect_output_is_an_error() {
        assert!(matches!(
            parse_inspect("x", "Error: nope"),
            Err(RuntimeError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let runtime = DockerCliRuntime {
            binary: "/nonexistent/docker-binary".to_string(),
        };
        assert!(matches!(
            runtime.stop("abc").await,
            Err(RuntimeError::Spawn(_))
        ));
        assert!(matches!(
            runtime.force_remove("abc").await,
            CleanupOutcome::Failed(_)
        ));
        assert!(matches!(
            runtime.force_remove_by_name("workload-x").await,
            CleanupOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn stop_requires_container_id() {
        let runtime = DockerCliRuntime {
            binary: "docker".to_string(),
        };
        assert!(matches!(
            runtime.stop("").await,
            Err(RuntimeError::EmptyContainerId)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_captures_streams_and_exit_code() {
        let runtime = DockerCliRuntime {
            binary: "sh".to_string(),
        };
        let output = runtime
            .exec(&["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()])
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }
}
