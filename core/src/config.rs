use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use url::Url;

use crate::ledger::DEFAULT_LEDGER_KEY;
use crate::services::default_data_dir;
use inbox_api::Participant;

/// Options shared by every subcommand.
#[derive(Args, Debug, Default, Clone)]
pub struct Options {
    /// Act as this participant, e.g. `customer:12`.
    #[arg(long = "as", value_name = "ROLE:ID", global = true)]
    pub me: Option<Participant>,
    /// Base URL of the hosted message store.
    #[arg(long, global = true)]
    pub backend_url: Option<String>,
    /// Use an in-process store instead of the hosted one.
    #[arg(long, global = true)]
    pub offline: bool,
    /// Directory for local state such as the deletion ledger.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Where the device keeps its key-value state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    File,
    Sqlite,
}

#[derive(Clone)]
pub struct Backend {
    pub url: Url,
    pub api_key: String,
    pub table: String,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url.as_str())
            .field("api_key", &"<redacted>")
            .field("table", &self.table)
            .finish()
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Identity the client acts as.
    pub me: Option<Participant>,
    /// Hosted store; `None` when running offline.
    pub backend: Option<Backend>,
    pub data_dir: PathBuf,
    pub storage: StorageBackend,
    /// Storage key of the deletion ledger.
    pub ledger_key: String,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    identity: FileIdentity,
    #[serde(default)]
    backend: FileBackend,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileIdentity {
    participant: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileBackend {
    url: Option<String>,
    api_key: Option<String>,
    table: Option<String>,
}

#[derive(Deserialize)]
struct FileStorage {
    dir: Option<PathBuf>,
    #[serde(default = "default_ledger_key")]
    ledger_key: String,
    #[serde(default = "default_storage")]
    backend: String,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_ledger_key() -> String {
    DEFAULT_LEDGER_KEY.into()
}

fn default_storage() -> String {
    "file".into()
}

fn default_table() -> String {
    "messages".into()
}

fn default_logging() -> bool {
    true
}

impl Default for FileStorage {
    fn default() -> Self {
        Self {
            dir: None,
            ledger_key: default_ledger_key(),
            backend: default_storage(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(opts: &Options) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = opts
            .config
            .clone()
            .or_else(|| std::env::var("FEMINIQ_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/inbox.toml"));

        let file_cfg: FileConfig = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };

        let mut me = file_cfg
            .identity
            .participant
            .as_deref()
            .map(str::parse::<Participant>)
            .transpose()
            .map_err(anyhow::Error::msg)
            .context("invalid identity.participant")?;
        let mut url = file_cfg.backend.url;
        let mut api_key = file_cfg.backend.api_key.unwrap_or_default();
        let table = file_cfg.backend.table.unwrap_or_else(default_table);
        let mut data_dir = file_cfg.storage.dir;
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(p) = std::env::var("FEMINIQ_AS") {
            let p = p
                .parse::<Participant>()
                .map_err(anyhow::Error::msg)
                .context("invalid FEMINIQ_AS")?;
            me = Some(p);
        }
        if let Ok(u) = std::env::var("FEMINIQ_BACKEND_URL") {
            url = Some(u);
        }
        if let Ok(k) = std::env::var("FEMINIQ_API_KEY") {
            api_key = k;
        }
        if let Ok(d) = std::env::var("FEMINIQ_DATA_DIR") {
            data_dir = Some(PathBuf::from(d));
        }
        if let Ok(l) = std::env::var("FEMINIQ_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if opts.me.is_some() {
            me = opts.me;
        }
        if let Some(u) = &opts.backend_url {
            url = Some(u.clone());
        }
        if let Some(d) = &opts.data_dir {
            data_dir = Some(d.clone());
        }
        if let Some(l) = opts.logging {
            logging = l;
        }

        let backend = if opts.offline {
            None
        } else {
            let raw = url.context("missing_backend_url")?;
            let url = Url::parse(&raw).context("invalid_backend_url")?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("invalid_backend_url");
            }
            Some(Backend {
                url,
                api_key,
                table,
            })
        };

        let storage = match file_cfg.storage.backend.as_str() {
            "file" => StorageBackend::File,
            "sqlite" => StorageBackend::Sqlite,
            other => anyhow::bail!("unknown storage backend `{other}`"),
        };

        let data_dir = match data_dir {
            Some(d) => d,
            None => default_data_dir()?,
        };

        Ok(Self {
            me,
            backend,
            data_dir,
            storage,
            ledger_key: file_cfg.storage.ledger_key,
            logging_enabled: logging,
        })
    }
}
