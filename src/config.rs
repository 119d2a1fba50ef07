use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ImporterError;
use crate::import::ImportFilter;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 4064;
pub const DEFAULT_WEB_PORT: u16 = 4080;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const LOCAL_CONFIG: &str = "omero-importer.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub omero_bin: Option<PathBuf>,
    #[serde(default)]
    pub ext_filter: Option<String>,
    #[serde(default)]
    pub name_filter: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line. They take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub web_url: Option<String>,
    pub ext_filter: Option<String>,
    pub name_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub web_url: String,
    pub omero_bin: Option<PathBuf>,
    pub timeout: Duration,
    pub filter: ImportFilter,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file named by `path`, else `omero-importer.json` in the
    /// working directory, else the per-user config. A missing implicit file
    /// yields the defaults; a missing explicit one is an error.
    pub fn resolve(path: Option<&str>) -> Result<Config, ImporterError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::implicit_path(),
        };
        match config_path {
            Some(config_path) => Self::read(&config_path),
            None => Ok(Config::default()),
        }
    }

    fn implicit_path() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "openmicroscopy", "omero-importer")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .filter(|path| path.exists())
    }

    pub fn read(path: &Path) -> Result<Config, ImporterError> {
        let content =
            fs::read_to_string(path).map_err(|_| ImporterError::ConfigRead(path.to_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ImporterError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Merges command-line values over the config file and validates the result.
    /// Runs before any network access.
    pub fn resolve_settings(
        config: Config,
        overrides: Overrides,
    ) -> Result<(Settings, Credentials), ImporterError> {
        let host = overrides
            .host
            .or(config.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match overrides.port {
            Some(raw) => parse_port(&raw)?,
            None => match config.port {
                Some(0) => return Err(ImporterError::InvalidPort("0".to_string())),
                Some(port) => port,
                None => DEFAULT_PORT,
            },
        };

        let username = overrides.username.or(config.username).filter(|value| !value.is_empty());
        let password = overrides.password.filter(|value| !value.is_empty());
        let (Some(username), Some(password)) = (username, password) else {
            return Err(ImporterError::MissingCredentials);
        };

        let web_url = overrides
            .web_url
            .or(config.web_url)
            .unwrap_or_else(|| format!("http://{host}:{DEFAULT_WEB_PORT}"));
        let filter = ImportFilter::new(
            overrides.ext_filter.or(config.ext_filter).unwrap_or_default(),
            overrides.name_filter.or(config.name_filter).unwrap_or_default(),
        );

        let settings = Settings {
            host,
            port,
            web_url,
            omero_bin: config.omero_bin,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            filter,
        };
        Ok((settings, Credentials { username, password }))
    }
}

pub fn parse_port(raw: &str) -> Result<u16, ImporterError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ImporterError::InvalidPort(raw.to_string())),
    }
}
