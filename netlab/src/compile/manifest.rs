//! The docker-compose document produced by the compiler

use indexmap::IndexMap;
use serde::Serialize;

/// Prefix docker gives to the interfaces it creates inside containers
pub const IFACE_PREFIX_OPTION: &str = "com.docker.network.container_iface_prefix";

/// A complete compose file
///
/// Services come first, `docker compose down` fails when networks precede them.
#[derive(Debug, Default, Serialize)]
pub struct Manifest {
    pub services: IndexMap<String, ServiceEntry>,
    pub networks: IndexMap<String, NetworkEntry>,
}

impl Manifest {
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Serialize)]
pub struct ServiceEntry {
    pub container_name: String,
    pub image: String,
    pub restart: String,
    pub deploy: Deploy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memswap_limit: Option<String>,
    pub volumes: Vec<String>,
    pub logging: Logging,
    pub networks: Vec<String>,
    pub cap_add: Vec<String>,
    pub privileged: bool,
    pub environment: IndexMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Deploy {
    pub resources: Resources,
}

#[derive(Debug, Serialize)]
pub struct Resources {
    pub limits: Limits,
}

#[derive(Debug, Serialize)]
pub struct Limits {
    pub cpus: String,
    pub memory: String,
}

#[derive(Debug, Serialize)]
pub struct Logging {
    pub driver: String,
}

#[derive(Debug, Serialize)]
pub struct NetworkEntry {
    pub name: String,
    pub driver: String,
    pub internal: bool,
    pub ipam: Ipam,
    pub driver_opts: IndexMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Ipam {
    pub config: Vec<IpamConfig>,
}

#[derive(Debug, Serialize)]
pub struct IpamConfig {
    pub subnet: String,
}
