use std::error::Error;

use anyhow::Context;
use config::{load_config, AppConfig, RuntimeKind};
use domain::{port::ContainerRuntime, DeploymentSettings, ReconciliationService, WorkloadLocks};
use infra::{
    cli::DockerCliRuntime, memory::InMemoryWorkloadStore, network::LoopbackPortAllocator,
    web::router,
};
use log::info;
use tokio::net::TcpListener;

mod config;
mod domain;
mod infra;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    info!("Start workload console");

    let config = load_config()?;
    info!("Loaded config {:?}", config);

    let service = ReconciliationService {
        workload_store: Box::new(InMemoryWorkloadStore::default()),
        container_runtime: container_runtime(&config)?,
        port_allocator: Box::new(LoopbackPortAllocator),
        settings: DeploymentSettings {
            public_host: config.public_host.clone(),
            default_image: config.default_image.clone(),
            resource_limits: config.resource_limits,
        },
        locks: WorkloadLocks::default(),
    };

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .context(format!("Can't listen on {}", config.listen_address))?;
    info!("Listening on {}", config.listen_address);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

fn container_runtime(
    config: &AppConfig,
) -> Result<Box<dyn ContainerRuntime + 'static + Sync + Send>, anyhow::Error> {
    match config.runtime {
        RuntimeKind::Cli => Ok(Box::new(DockerCliRuntime {
            binary: config.docker_binary.clone(),
        })),
        #[cfg(feature = "docker")]
        RuntimeKind::Api => {
            use bollard::{Docker, API_DEFAULT_VERSION};
            let docker =
                Docker::connect_with_socket(&config.docker_socket, 120, API_DEFAULT_VERSION)
                    .context("Can't connect to docker socket")?;
            Ok(Box::new(infra::docker::DockerApiRuntime { docker }))
        }
        #[cfg(not(feature = "docker"))]
        RuntimeKind::Api => Err(anyhow::anyhow!(
            "Engine API runtime requires the `docker` feature"
        )),
    }
}
