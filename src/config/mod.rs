use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod themes;

pub use themes::{Palette, ThemeFlag};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Folio";
const APP_NAME: &str = "folio";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            self.write_default_config(&default_cfg)?;
            default_cfg.post_load(&self.paths)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub profile_file: PathBuf,
    pub data_dir: PathBuf,
    pub store_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("FOLIO_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("FOLIO_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, state_dir))
    }

    /// Lays every path out below the given roots.
    pub fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            profile_file: config_dir.join("profile.toml"),
            store_path: data_dir.join("local-storage.db"),
            log_dir: state_dir.join("logs"),
            config_dir,
            config_file,
            data_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Theme used until the user toggles one; the toggle is persisted in
    /// the local store and wins from then on.
    pub default_theme: ThemeFlag,
    pub profile_path: Option<PathBuf>,
    pub contact: ContactConfig,
    pub outbox: OutboxConfig,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_theme: ThemeFlag::Dark,
            profile_path: None,
            contact: ContactConfig::default(),
            outbox: OutboxConfig::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage.resolve(paths);
        self.contact
            .validate()
            .context("validating contact endpoint")?;
        self.outbox.clamp();
        if self.profile_path.is_none() && paths.profile_file.exists() {
            self.profile_path = Some(paths.profile_file.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5175/api/contact".into(),
            request_timeout_secs: 30,
        }
    }
}

impl ContactConfig {
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(self.endpoint.trim())
            .with_context(|| format!("parsing endpoint '{}'", self.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("endpoint must use http or https, got '{}'", url.scheme());
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn validate(&self) -> Result<()> {
        self.endpoint_url().map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Fixed reconciliation interval while the outbox worker is running.
    pub retry_interval_secs: u64,
    /// Fire one background delivery for a submission right after it is queued.
    pub background_retry: bool,
    /// How often to probe the endpoint for the offline -> online transition
    /// (0 disables the probe).
    pub probe_interval_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 10,
            background_retry: true,
            probe_interval_secs: 5,
        }
    }
}

impl OutboxConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        if self.probe_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.probe_interval_secs))
        }
    }

    fn clamp(&mut self) {
        if self.retry_interval_secs == 0 {
            tracing::warn!("retry_interval_secs = 0 is not allowed, using 1");
            self.retry_interval_secs = 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub store_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            store_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.store_path.as_os_str().is_empty() {
            self.store_path = paths.store_path.clone();
        }
    }
}
