use crate::errors::{EngineError, EngineResult};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub server_port: u16,
    /// Paths per simulation when a request does not say otherwise
    pub default_path_count: usize,
    /// Histogram buckets when a request does not say otherwise
    pub default_bin_count: usize,
    /// Quiet period after the last simulate request before the run starts
    pub debounce_ms: u64,
    /// Fixed seed for reproducible runs (unset = fresh entropy per run)
    pub seed: Option<u64>,
    pub default_rate: f64,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let server_port = parse_env("SERVER_PORT", "3001")?;
        let default_path_count: usize = parse_env("MC_PATH_COUNT", "1000000")?;
        let default_bin_count: usize = parse_env("MC_BIN_COUNT", "120")?;
        let debounce_ms = parse_env("SIM_DEBOUNCE_MS", "250")?;
        let default_rate = parse_env("DEFAULT_RATE", "0.03")?;

        let seed = match std::env::var("MC_SEED") {
            Ok(raw) => Some(parse_value::<u64>("MC_SEED", &raw)?),
            Err(_) => None,
        };

        if default_path_count == 0 || default_bin_count == 0 {
            return Err(EngineError::Config(
                "MC_PATH_COUNT and MC_BIN_COUNT must be positive".into(),
            ));
        }

        Ok(Self {
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port,
            default_path_count,
            default_bin_count,
            debounce_ms,
            seed,
            default_rate,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            server_port: 3001,
            default_path_count: 1_000_000,
            default_bin_count: 120,
            debounce_ms: 250,
            seed: None,
            default_rate: 0.03,
        }
    }
}

fn parse_env<T>(key: &str, default: &str) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &env_var_or(key, default))
}

fn parse_value<T>(key: &str, raw: &str) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
