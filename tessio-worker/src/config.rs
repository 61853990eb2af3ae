use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tessio_core::{Result, TessioError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub orchestrator: Option<OrchestratorEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

/// Where to announce ourselves at boot. Optional so a worker can also be
/// attached later through its own registration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorEndpoint {
    pub address: String,
}

fn default_hostname() -> String {
    "127.0.0.1".to_string()
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("TESSIO"))
            .build()
            .map_err(|e| TessioError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| TessioError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.node.port)
    }

    pub fn advertised_address(&self) -> String {
        format!("{}:{}", self.node.hostname, self.node.port)
    }
}
