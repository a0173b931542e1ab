//! Configuration management for the relayer fleet
//!
//! Loads an optional TOML settings file with environment variable
//! substitution. Every section has defaults, so a missing file is valid.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the settings file location
pub const CONFIG_ENV: &str = "RELAYER_FLEET_CONFIG";

/// Settings file name looked up inside the home directory
pub const CONFIG_FILE_NAME: &str = "fleet.toml";

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fleet: FleetConfig,
    pub relayer: RelayerConfig,
    pub daemon: DaemonConfig,
    pub proxy: ProxyConfig,
    pub metrics: MetricsConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// First port the allocator probes on every run
    pub base_port: u16,
    /// Upper bound on probes per allocation before giving up
    pub max_port_probes: u16,
    pub probe_timeout_ms: u64,
    /// Chain name -> chain id mapping, relative to home unless absolute
    pub chain_registry: PathBuf,
    /// External config generator, relative to home unless absolute
    pub generator: PathBuf,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_port: 3000,
            max_port_probes: 1000,
            probe_timeout_ms: 250,
            chain_registry: PathBuf::from("chain_chainid.json"),
            generator: PathBuf::from("prepare-config.sh"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    pub binary: PathBuf,
    pub proxy_launcher: String,
    /// Bound on the endpoints refresh step; unbounded when unset
    pub refresh_timeout_secs: Option<u64>,
    /// How long `stop` waits for the process to exit before clearing state
    pub stop_grace_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("hermes"),
            proxy_launcher: default_proxy_launcher().to_string(),
            refresh_timeout_secs: None,
            stop_grace_secs: 5,
        }
    }
}

fn default_proxy_launcher() -> &'static str {
    if cfg!(target_os = "macos") {
        "proxychains4"
    } else {
        "proxychains"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub monitor_interval_secs: u64,
    pub restart_backoff_initial_secs: u64,
    pub restart_backoff_max_secs: u64,
    pub fleet_interval_secs: u64,
    pub fleet_restart_pause_secs: u64,
    pub registry_interval_secs: u64,
    pub channels_interval_secs: u64,
    pub proxy_interval_secs: u64,
    pub registry_refresh_command: Vec<String>,
    pub channel_discovery_command: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 5,
            restart_backoff_initial_secs: 1,
            restart_backoff_max_secs: 300,
            fleet_interval_secs: 3 * 60 * 60,
            fleet_restart_pause_secs: 10,
            registry_interval_secs: 24 * 60 * 60,
            channels_interval_secs: 3 * 60 * 60,
            proxy_interval_secs: 60 * 60,
            registry_refresh_command: Vec::new(),
            channel_discovery_command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy list JSON document
    pub source: Option<PathBuf>,
    /// Generated proxychains config; defaults to ~/.proxychains/proxychains.conf
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9464,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9465,
        }
    }
}

impl Settings {
    /// Load settings for a home directory
    ///
    /// The file named by `RELAYER_FLEET_CONFIG` must exist when the variable
    /// is set; otherwise `<home>/fleet.toml` is used when present.
    pub fn load(home: &Path) -> Result<Self> {
        let config_path = match env::var(CONFIG_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => {
                let path = home.join(CONFIG_FILE_NAME);
                if !path.exists() {
                    tracing::debug!("No settings file at {:?}, using defaults", path);
                    return Ok(Self::default());
                }
                path
            }
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.fleet.base_port == 0 {
            anyhow::bail!("fleet.base_port must be greater than zero");
        }

        if self.fleet.max_port_probes == 0 {
            anyhow::bail!("fleet.max_port_probes must be greater than zero");
        }

        if self.daemon.monitor_interval_secs == 0 {
            anyhow::bail!("daemon.monitor_interval_secs must be greater than zero");
        }

        if self.daemon.restart_backoff_initial_secs > self.daemon.restart_backoff_max_secs {
            anyhow::bail!("daemon.restart_backoff_initial_secs exceeds restart_backoff_max_secs");
        }

        if self.relayer.binary.as_os_str().is_empty() {
            anyhow::bail!("relayer.binary must not be empty");
        }

        Ok(())
    }

    /// Chain registry path resolved against the home directory
    pub fn chain_registry_path(&self, home: &Path) -> PathBuf {
        home.join(&self.fleet.chain_registry)
    }

    /// Config generator path resolved against the home directory
    pub fn generator_path(&self, home: &Path) -> PathBuf {
        home.join(&self.fleet.generator)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("FLEET_TEST_VAR", "test_value");
        let input = "binary = \"/opt/${FLEET_TEST_VAR}/hermes\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "binary = \"/opt/test_value/hermes\"");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [fleet]
            base_port = 4000

            [relayer]
            refresh_timeout_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(settings.fleet.base_port, 4000);
        assert_eq!(settings.fleet.max_port_probes, 1000);
        assert_eq!(settings.relayer.binary, PathBuf::from("hermes"));
        assert_eq!(settings.relayer.refresh_timeout_secs, Some(120));
        assert_eq!(settings.daemon.monitor_interval_secs, 5);
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let result = Settings::from_toml(
            r#"
            [daemon]
            restart_backoff_initial_secs = 600
            restart_backoff_max_secs = 60
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_base_port() {
        let result = Settings::from_toml(
            r#"
            [fleet]
            base_port = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_home() {
        let home = tempfile::TempDir::new().unwrap();
        let defaults = Settings::load(home.path()).unwrap();
        assert_eq!(defaults.fleet.base_port, 3000);

        std::fs::write(
            home.path().join(CONFIG_FILE_NAME),
            "[metrics]\nenabled = true\n\n[proxy]\nsource = \"proxies.json\"\n",
        )
        .unwrap();
        let settings = Settings::load(home.path()).unwrap();
        assert!(settings.metrics.enabled);
        assert_eq!(settings.metrics.port, 9464);
        assert_eq!(settings.proxy.source, Some(PathBuf::from("proxies.json")));
    }

    #[test]
    fn test_relative_paths_resolve_against_home() {
        let settings = Settings::default();
        let home = Path::new("/srv/fleet");
        assert_eq!(
            settings.chain_registry_path(home),
            PathBuf::from("/srv/fleet/chain_chainid.json")
        );

        let settings = Settings::from_toml("[fleet]\ngenerator = \"/usr/bin/gen\"\n").unwrap();
        assert_eq!(settings.generator_path(home), PathBuf::from("/usr/bin/gen"));
    }
}
