//! Service configuration loaded once at startup.
//!
//! The configuration file is a JSON object. Every key is optional; defaults
//! are applied after parsing and the result is validated before the server
//! starts.
//!
//! ```json
//! {
//!   "workdir": "/var/lib/pdf-convert",
//!   "rootPath": "/convert/",
//!   "cors": { "origin": ["https://app.example.com"] },
//!   "token": "s3cret",
//!   "timeout": 90,
//!   "maxConcurrentJobs": 2
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Default listening port when neither the CLI nor the file sets one.
pub const DEFAULT_PORT: u16 = 5000;

/// Default converter deadline in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default upper bound on a single WebSocket message (64 MiB).
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Default number of conversions a single connection may run at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;

/// Name of the configuration file looked up in the root directory.
const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Transport namespace the conversion endpoint is mounted under.
const NAMESPACE: &str = "/pdf";

/// Raw file contents before defaults are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    workdir: Option<PathBuf>,
    root_path: Option<String>,
    cors: Option<CorsConfig>,
    token: Option<String>,
    port: Option<u16>,
    converter: Option<PathBuf>,
    timeout: Option<u64>,
    max_upload_size: Option<usize>,
    max_concurrent_jobs: Option<usize>,
}

/// Cross-origin policy applied to the HTTP layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub origin: CorsOrigin,
}

/// Either a single origin (`"*"` allows any) or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    One(String),
    Many(Vec<String>),
}

impl Default for CorsOrigin {
    fn default() -> Self {
        CorsOrigin::One("*".to_string())
    }
}

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root under which per-job workspaces are created (`<workdir>/tmp`).
    pub workdir: PathBuf,
    /// Path prefix for the transport endpoint, without trailing slash.
    pub root_path: Option<String>,
    pub cors: CorsConfig,
    /// Shared bearer secret. `None` disables authorization.
    pub token: Option<String>,
    pub port: u16,
    /// Explicit converter binary, bypassing discovery.
    pub converter: Option<PathBuf>,
    pub timeout: Duration,
    pub max_upload_size: usize,
    /// Conversions one connection may run at once; further requests wait.
    pub max_concurrent_jobs: usize,
}

impl Config {
    /// Configuration with every default applied, rooted at `workdir`.
    pub fn with_workdir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            root_path: None,
            cors: CorsConfig::default(),
            token: None,
            port: DEFAULT_PORT,
            converter: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }

    /// Loads configuration from `explicit` or `<root_dir>/config.json`.
    ///
    /// A missing default file yields all defaults; a missing explicit file is
    /// an error.
    pub fn load(explicit: Option<&Path>, root_dir: &Path) -> Result<Self> {
        let filename = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root_dir.join(DEFAULT_CONFIG_FILE));

        let raw = if filename.exists() {
            let contents = std::fs::read_to_string(&filename)
                .with_context(|| format!("Failed to read {}", filename.display()))?;
            let raw = Self::parse(&contents)
                .with_context(|| format!("Failed to parse {}", filename.display()))?;
            info!("Configuration loaded from {}", filename.display());
            raw
        } else if explicit.is_some() {
            bail!("Configuration file {} does not exist", filename.display());
        } else {
            FileConfig::default()
        };

        Self::resolve(raw, root_dir)
    }

    fn parse(contents: &str) -> Result<FileConfig> {
        Ok(serde_json::from_str(contents)?)
    }

    fn resolve(raw: FileConfig, root_dir: &Path) -> Result<Self> {
        let defaults = Self::with_workdir(raw.workdir.unwrap_or_else(|| root_dir.to_path_buf()));

        let root_path = raw
            .root_path
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .map(|p| if p.starts_with('/') { p } else { format!("/{p}") });

        let config = Self {
            root_path,
            cors: raw.cors.unwrap_or_default(),
            token: raw.token.filter(|t| !t.is_empty()),
            port: raw.port.unwrap_or(defaults.port),
            converter: raw.converter,
            timeout: raw.timeout.map(Duration::from_secs).unwrap_or(defaults.timeout),
            max_upload_size: raw.max_upload_size.unwrap_or(defaults.max_upload_size),
            max_concurrent_jobs: raw
                .max_concurrent_jobs
                .unwrap_or(defaults.max_concurrent_jobs),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        if self.max_upload_size == 0 {
            bail!("maxUploadSize must be greater than zero");
        }
        if self.max_concurrent_jobs == 0 {
            bail!("maxConcurrentJobs must be greater than zero");
        }
        Ok(())
    }

    /// Prefixes `path` with the configured root path.
    pub fn get_path(&self, path: &str) -> String {
        match &self.root_path {
            Some(root) => format!("{root}{path}"),
            None => path.to_string(),
        }
    }

    /// Route of the conversion WebSocket endpoint.
    pub fn endpoint_path(&self) -> String {
        self.get_path(NAMESPACE)
    }

    /// Directory holding every workspace.
    pub fn workspace_root(&self) -> PathBuf {
        self.workdir.join("tmp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(None, dir.path()).unwrap();

        assert_eq!(config.workdir, dir.path().to_path_buf());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.token, None);
        assert_eq!(config.cors.origin, CorsOrigin::One("*".to_string()));
        assert_eq!(config.endpoint_path(), "/pdf");
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.max_concurrent_jobs, 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("custom.json");
        std::fs::write(
            &file,
            r#"{
                "workdir": "/srv/convert",
                "rootPath": "/api/",
                "cors": { "origin": ["https://a.example", "https://b.example"] },
                "token": "abc",
                "port": 8080,
                "timeout": 30
            }"#,
        )
        .unwrap();

        let config = Config::load(Some(&file), dir.path()).unwrap();

        assert_eq!(config.workdir, PathBuf::from("/srv/convert"));
        assert_eq!(config.root_path.as_deref(), Some("/api"));
        assert_eq!(config.endpoint_path(), "/api/pdf");
        assert_eq!(
            config.cors.origin,
            CorsOrigin::Many(vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ])
        );
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.workspace_root(), PathBuf::from("/srv/convert/tmp"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Config::load(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_empty_token_disables_auth() {
        let config = Config::resolve(
            FileConfig {
                token: Some(String::new()),
                ..Default::default()
            },
            Path::new("/tmp"),
        )
        .unwrap();
        assert_eq!(config.token, None);
    }

    #[test]
    fn test_root_path_normalization() {
        let config = Config::resolve(
            FileConfig {
                root_path: Some("convert/".to_string()),
                ..Default::default()
            },
            Path::new("/tmp"),
        )
        .unwrap();
        assert_eq!(config.endpoint_path(), "/convert/pdf");

        let config = Config::resolve(
            FileConfig {
                root_path: Some("/".to_string()),
                ..Default::default()
            },
            Path::new("/tmp"),
        )
        .unwrap();
        assert_eq!(config.endpoint_path(), "/pdf");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = Config::resolve(
            FileConfig {
                timeout: Some(0),
                ..Default::default()
            },
            Path::new("/tmp"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_max_concurrent_jobs() {
        let raw = Config::parse(r#"{ "maxConcurrentJobs": 4 }"#).unwrap();
        let config = Config::resolve(raw, Path::new("/tmp")).unwrap();
        assert_eq!(config.max_concurrent_jobs, 4);

        let raw = Config::parse(r#"{ "maxConcurrentJobs": 0 }"#).unwrap();
        assert!(Config::resolve(raw, Path::new("/tmp")).is_err());
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(Config::parse("{ not json").is_err());
    }
}
