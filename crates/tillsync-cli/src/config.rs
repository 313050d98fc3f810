//! CLI settings resolved from flags, environment and an optional config file.

use std::env;
use std::path::{Path, PathBuf};

use tillsync_core::util::normalize_text_option;
use tillsync_core::{parse_engine_config, EngineConfig, RemoteConfig, SyncOptions, TableRegistry};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_TABLES: [&str; 3] = ["orders", "inventory", "expenses"];

/// Values read from `TILLSYNC_*` environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub db_path: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            supabase_url: read_env("TILLSYNC_SUPABASE_URL"),
            supabase_anon_key: read_env("TILLSYNC_SUPABASE_ANON_KEY"),
            access_token: read_env("TILLSYNC_ACCESS_TOKEN"),
            user_id: read_env("TILLSYNC_USER_ID"),
            db_path: env::var_os("TILLSYNC_DB_PATH").map(PathBuf::from),
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    normalize_text_option(env::var(key).ok())
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tillsync").join(CONFIG_FILE_NAME))
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tillsync")
        .join("tillsync.db")
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, env: &EnvOverrides) -> PathBuf {
    cli_db_path
        .or_else(|| env.db_path.clone())
        .unwrap_or_else(default_db_path)
}

pub fn resolve_user(cli_user: Option<&str>, env: &EnvOverrides) -> Result<String, CliError> {
    normalize_text_option(cli_user.map(str::to_string))
        .or_else(|| env.user_id.clone())
        .ok_or(CliError::MissingUser)
}

/// Load the engine config: explicit file, else the default config file when
/// present, else the built-in table set. Environment credentials override the
/// file's remote section.
pub fn load_engine_config(
    explicit: Option<&Path>,
    env: &EnvOverrides,
) -> Result<EngineConfig, CliError> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| default_config_path().filter(|path| path.exists()));

    let config = match path {
        Some(path) => read_config_file(&path)?,
        None => default_engine_config()?,
    };
    apply_env(config, env)?.validated().map_err(CliError::Config)
}

fn read_config_file(path: &Path) -> Result<EngineConfig, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        CliError::Config(format!(
            "Failed to read config at {}: {error}",
            path.display()
        ))
    })?;
    parse_engine_config(&raw)
        .map_err(|error| CliError::Config(format!("{} ({})", error, path.display())))
}

fn default_engine_config() -> Result<EngineConfig, CliError> {
    let tables = TableRegistry::new(DEFAULT_TABLES.map(|table| (table, table)))
        .map_err(|error| CliError::Config(error.to_string()))?;
    Ok(EngineConfig {
        remote: None,
        tables,
        sync: SyncOptions::default(),
    })
}

fn apply_env(mut config: EngineConfig, env: &EnvOverrides) -> Result<EngineConfig, CliError> {
    match (&env.supabase_url, &env.supabase_anon_key) {
        (Some(url), Some(anon_key)) => {
            let mut remote = RemoteConfig::new(url, anon_key);
            if let Some(existing) = &config.remote {
                remote.request_timeout = existing.request_timeout;
                remote.access_token.clone_from(&existing.access_token);
            }
            config.remote = Some(remote);
        }
        (None, None) => {}
        _ => {
            return Err(CliError::Config(
                "TILLSYNC_SUPABASE_URL and TILLSYNC_SUPABASE_ANON_KEY must be set together"
                    .to_string(),
            ));
        }
    }

    if let (Some(token), Some(remote)) = (&env.access_token, config.remote.as_mut()) {
        remote.access_token = Some(token.clone());
    }
    Ok(config)
}
