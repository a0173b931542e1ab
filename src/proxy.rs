//! Proxychains config generation for proxied relayer starts

use crate::config::Settings;
use crate::error::{FleetError, FleetResult};

use serde::Deserialize;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use tracing::info;

const CONFIG_HEADER: &[&str] = &[
    "random_chain",
    "chain_len = 1",
    "proxy_dns",
    "remote_dns_subnet 224",
    "tcp_read_time_out 15000",
    "tcp_connect_time_out 8000",
    "localnet 127.0.0.0/255.0.0.0",
    "[ProxyList]",
];

#[derive(Debug, Deserialize)]
struct ProxyListDocument {
    #[serde(default)]
    results: Vec<ProxyRecord>,
}

/// One HTTP proxy with credentials
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyRecord {
    pub proxy_address: String,
    pub port: ProxyPort,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Proxy lists publish ports both as numbers and as strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProxyPort {
    Number(u16),
    Text(String),
}

impl fmt::Display for ProxyPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyPort::Number(port) => write!(f, "{}", port),
            ProxyPort::Text(port) => f.write_str(port),
        }
    }
}

/// Parse a `{ "results": [ { proxy_address, port, username, password } ] }` document
pub fn parse_proxy_list(input: &str) -> FleetResult<Vec<ProxyRecord>> {
    let document: ProxyListDocument = serde_json::from_str(input)
        .map_err(|e| FleetError::Config(format!("Invalid proxy list: {}", e)))?;
    Ok(document.results)
}

/// Render the proxychains config for a proxy list
pub fn render_config(proxies: &[ProxyRecord]) -> String {
    let mut out = String::new();
    for line in CONFIG_HEADER {
        out.push_str(line);
        out.push('\n');
    }
    for proxy in proxies {
        // Infallible for String
        let _ = writeln!(
            out,
            "http\t{}\t{}\t{}\t{}",
            proxy.proxy_address, proxy.port, proxy.username, proxy.password
        );
    }
    out
}

/// Rewrites the proxychains config from the configured proxy list
#[derive(Debug, Clone)]
pub struct ProxyUpdater {
    launcher: String,
    source: PathBuf,
    output: PathBuf,
}

impl ProxyUpdater {
    pub fn new(launcher: impl Into<String>, source: PathBuf, output: PathBuf) -> Self {
        Self {
            launcher: launcher.into(),
            source,
            output,
        }
    }

    /// Relative `proxy.source` and `proxy.output` paths are taken from `home`
    pub fn from_settings(settings: &Settings, home: &Path) -> FleetResult<Self> {
        let source = settings
            .proxy
            .source
            .as_ref()
            .map(|path| home.join(path))
            .ok_or_else(|| FleetError::Config("proxy.source is not set".to_string()))?;

        let output = match &settings.proxy.output {
            Some(path) => home.join(path),
            None => dirs::home_dir()
                .map(|home| home.join(".proxychains").join("proxychains.conf"))
                .ok_or_else(|| {
                    FleetError::Config("Cannot determine home directory for proxy.output".to_string())
                })?,
        };

        Ok(Self::new(settings.relayer.proxy_launcher.clone(), source, output))
    }

    /// Replace the proxychains config; returns the number of proxies written
    ///
    /// Fails before touching the output when the proxy launcher is not installed.
    pub fn update(&self) -> FleetResult<usize> {
        let launcher = which::which(&self.launcher).map_err(|_| {
            FleetError::ProxyLauncherMissing {
                name: self.launcher.clone(),
            }
        })?;
        info!("{} is installed at {:?}", self.launcher, launcher);

        info!("Reading proxy list from {:?}", self.source);
        let raw = std::fs::read_to_string(&self.source)
            .map_err(|e| FleetError::io(format!("Failed to read {:?}", self.source), e))?;
        let proxies = parse_proxy_list(&raw)?;

        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetError::io(format!("Failed to create {:?}", parent), e))?;
        }
        std::fs::write(&self.output, render_config(&proxies))
            .map_err(|e| FleetError::io(format!("Failed to write {:?}", self.output), e))?;

        info!("Wrote {} proxies to {:?}", proxies.len(), self.output);
        Ok(proxies.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "count": 2,
        "results": [
            {"proxy_address": "10.0.0.1", "port": 8080, "username": "alice", "password": "s3cret", "valid": true},
            {"proxy_address": "10.0.0.2", "port": "3128", "username": "bob", "password": "hunter2"}
        ]
    }"#;

    fn fake_launcher(dir: &Path) -> String {
        let path = dir.join("fake-proxychains");
        std::fs::write(&path, "#!/bin/sh\nexec \"$@\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_render_config() {
        let proxies = parse_proxy_list(SAMPLE).unwrap();
        let rendered = render_config(&proxies);

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "random_chain");
        assert_eq!(lines[7], "[ProxyList]");
        assert_eq!(lines[8], "http\t10.0.0.1\t8080\talice\ts3cret");
        assert_eq!(lines[9], "http\t10.0.0.2\t3128\tbob\thunter2");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn test_missing_results_renders_header_only() {
        let proxies = parse_proxy_list("{}").unwrap();
        assert!(proxies.is_empty());
        assert!(render_config(&proxies).ends_with("[ProxyList]\n"));
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(parse_proxy_list("[1, 2]"), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_update_replaces_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("proxies.json");
        let output = dir.path().join("nested/proxychains.conf");
        std::fs::write(&source, SAMPLE).unwrap();
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, "stale contents\n").unwrap();

        let updater = ProxyUpdater::new(fake_launcher(dir.path()), source, output.clone());
        assert_eq!(updater.update().unwrap(), 2);

        let written = std::fs::read_to_string(&output).unwrap();
        assert!(!written.contains("stale"));
        assert!(written.contains("http\t10.0.0.2\t3128\tbob\thunter2"));
    }

    #[test]
    fn test_update_without_launcher_leaves_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("proxies.json");
        let output = dir.path().join("proxychains.conf");
        std::fs::write(&source, SAMPLE).unwrap();
        std::fs::write(&output, "keep\n").unwrap();

        let updater = ProxyUpdater::new("definitely-not-a-proxy-launcher", source, output.clone());
        let err = updater.update().unwrap_err();

        assert!(matches!(err, FleetError::ProxyLauncherMissing { .. }));
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "keep\n");
    }

    #[test]
    fn test_from_settings_requires_source() {
        let settings = Settings::default();
        assert!(matches!(
            ProxyUpdater::from_settings(&settings, Path::new("/srv/relayers")),
            Err(FleetError::Config(_))
        ));
    }

    #[test]
    fn test_from_settings_resolves_relative_paths_from_home() {
        let home = TempDir::new().unwrap();
        std::fs::write(home.path().join("proxies.json"), SAMPLE).unwrap();
        let mut settings = Settings::default();
        settings.relayer.proxy_launcher = fake_launcher(home.path());
        settings.proxy.source = Some(PathBuf::from("proxies.json"));
        settings.proxy.output = Some(PathBuf::from("proxychains/proxychains.conf"));

        let updater = ProxyUpdater::from_settings(&settings, home.path()).unwrap();
        assert_eq!(updater.update().unwrap(), 2);

        let written = home.path().join("proxychains/proxychains.conf");
        assert!(std::fs::read_to_string(written).unwrap().contains("10.0.0.1"));
    }

    #[test]
    fn test_from_settings_keeps_absolute_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("proxies.json");
        let mut settings = Settings::default();
        settings.proxy.source = Some(source.clone());

        let updater = ProxyUpdater::from_settings(&settings, Path::new("/srv/relayers")).unwrap();
        assert_eq!(updater.source, source);
    }
}
