use std::fs::read_to_string;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use once_cell::sync::Lazy;
use serde::{self, Deserialize};
use tracing::{debug, error, info};

use crate::error::CatalogServerError;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/catalogserver/config.toml";

pub static CONFIG: Lazy<parking_lot::RwLock<Configuration>> =
    Lazy::new(|| parking_lot::RwLock::new(Configuration::default()));

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the metadata store and runs `enableSharding`.
    #[default]
    Coordinator,
    /// Serves cached catalog reads and receives invalidations.
    Router,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "coordinator" => Ok(Self::Coordinator),
            "router" => Ok(Self::Router),
            other => Err(format!(
                "unknown role '{}'; expected coordinator or router",
                other
            )),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Configuration {
    pub name: String,
    pub role: Role,

    pub rpc_server_addr: Option<String>,
    pub work_dir: Option<String>,

    // address of the coordinator a router node pulls metadata from
    pub coordinator_addr: Option<String>,
    // routing nodes the coordinator pushes invalidations to
    pub router_nodes: Vec<String>,

    pub case_insensitive_names: bool,
    pub max_name_len: usize,

    pub max_conflict_retries: u32,
    pub conflict_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub invalidate_timeout_ms: u64,

    pub cache_lease_ms: u64,
    pub cache_refresh_interval_secs: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: "catalogserver".to_string(),
            role: Role::Coordinator,
            rpc_server_addr: None,
            work_dir: None,
            coordinator_addr: None,
            router_nodes: vec![],
            case_insensitive_names: true,
            max_name_len: 63,
            max_conflict_retries: 5,
            conflict_backoff_ms: 10,
            request_timeout_ms: 30_000,
            invalidate_timeout_ms: 1_000,
            cache_lease_ms: 30_000,
            cache_refresh_interval_secs: 10,
        }
    }
}

impl Configuration {
    pub fn parse_config_file(file: &str) -> Result<Configuration> {
        info!("parsing configuration file: {}", file);

        let file_contents = read_to_string(file).map_err(|e| {
            error!("failed to read configuration file {}, err: {}", file, e);
            anyhow!(CatalogServerError::FailedToRead)
        })?;

        let ret: Configuration = toml::from_str(&file_contents).map_err(|e| {
            error!("failed to parse configuration file {}, err: {}", file, e);
            anyhow!(CatalogServerError::InvalidToml)
        })?;

        debug!("configuration: {:?}", ret);
        Ok(ret)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn invalidate_timeout(&self) -> Duration {
        Duration::from_millis(self.invalidate_timeout_ms)
    }

    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }

    pub fn cache_lease(&self) -> Duration {
        Duration::from_millis(self.cache_lease_ms)
    }

    pub fn cache_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cache_refresh_interval_secs)
    }
}

pub fn validate_configuration(config: &Configuration) -> Result<()> {
    let Some(addr) = config.rpc_server_addr.as_ref() else {
        bail!(CatalogServerError::InvalidConfig(
            "rpc_server_addr is required".into()
        ));
    };
    if addr.parse::<SocketAddr>().is_err() {
        bail!(CatalogServerError::InvalidConfig(format!(
            "rpc_server_addr {addr} is not a socket address"
        )));
    }

    if config.work_dir.is_none() {
        bail!(CatalogServerError::InvalidConfig("work_dir is required".into()));
    }

    if config.role == Role::Router && config.coordinator_addr.is_none() {
        bail!(CatalogServerError::InvalidConfig(
            "coordinator_addr is required for a router node".into()
        ));
    }

    if config.max_name_len == 0 {
        bail!(CatalogServerError::InvalidConfig(
            "max_name_len must be positive".into()
        ));
    }

    if config.request_timeout_ms == 0 || config.invalidate_timeout_ms == 0 {
        bail!(CatalogServerError::InvalidConfig(
            "timeouts must be positive".into()
        ));
    }

    Ok(())
}

pub fn init_config(config_file: &str) -> Result<()> {
    let conf = Configuration::parse_config_file(config_file)
        .inspect_err(|_| error!("failed to initialize config module"))?;

    validate_configuration(&conf)?;

    *CONFIG.write() = conf;

    info!("successfully initialized config module");
    debug!("configuration: {:?}", *CONFIG.read());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_config_parse() {
        let config_file1 = "tests/test_config/config1.toml";
        let config1_res = Configuration::parse_config_file(config_file1);
        assert!(config1_res.is_ok());

        let config1 = config1_res.unwrap();

        assert_eq!(config1.name, "cfg-1");
        assert_eq!(config1.role, Role::Coordinator);
        assert_eq!(config1.work_dir.as_deref(), Some("/"));
        assert_eq!(config1.rpc_server_addr.as_deref(), Some("0.0.0.0:8888"));
        assert_eq!(config1.router_nodes.len(), 2);
        assert_eq!(config1.max_conflict_retries, 8);
        // not present in the file
        assert_eq!(config1.max_name_len, 63);
        assert!(config1.case_insensitive_names);

        assert!(validate_configuration(&config1).is_ok());
    }

    #[test]
    pub fn test_router_requires_coordinator() {
        let conf = Configuration {
            role: Role::Router,
            rpc_server_addr: Some("127.0.0.1:9000".into()),
            work_dir: Some("/tmp".into()),
            ..Default::default()
        };
        assert!(validate_configuration(&conf).is_err());

        let conf = Configuration {
            coordinator_addr: Some("127.0.0.1:8888".into()),
            ..conf
        };
        assert!(validate_configuration(&conf).is_ok());
    }

    #[test]
    pub fn test_bad_rpc_addr() {
        let conf = Configuration {
            rpc_server_addr: Some("not-an-addr".into()),
            work_dir: Some("/tmp".into()),
            ..Default::default()
        };
        assert!(validate_configuration(&conf).is_err());
    }

    #[test]
    pub fn test_role_from_str() {
        assert_eq!("Router".parse::<Role>().unwrap(), Role::Router);
        assert_eq!(" coordinator".parse::<Role>().unwrap(), Role::Coordinator);
        assert!("balancer".parse::<Role>().is_err());
    }
}
