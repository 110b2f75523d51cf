use anyhow::{Context, Error};
use config::Config;

#[derive(Debug, Clone, Copy, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Shell out to the docker binary.
    Cli,
    /// Talk to the engine socket directly.
    Api,
}

#[derive(Debug, Clone, serde_derive::Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub listen_address: String,
    /// Host used to build the access url of running workloads.
    pub public_host: String,
    pub runtime: RuntimeKind,
    pub docker_binary: String,
    pub docker_socket: String,
    pub default_image: String,
    pub resource_limits: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:3000".to_string(),
            public_host: "localhost".to_string(),
            runtime: RuntimeKind::Cli,
            docker_binary: "docker".to_string(),
            docker_socket: "/var/run/docker.sock".to_string(),
            default_image: "nginx:alpine".to_string(),
            resource_limits: false,
        }
    }
}

pub fn load_config() -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(config::Environment::with_prefix("workloads"))
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}
