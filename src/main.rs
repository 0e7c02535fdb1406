use gapfill::api::{ApiConfig, BinanceFuturesClient};
use gapfill::backfill::{BackfillActor, BackfillConfig};
use gapfill::health::start_status_server;
use gapfill::logging::{cleanup_old_logs, init_dual_logging, LogRotation, LoggingConfig};
use gapfill::store::{PostgresConfig, PostgresStore};
use serde::Deserialize;
use tracing::{info, warn};

/// Status server configuration from config.toml
#[derive(Debug, Clone, Deserialize)]
struct ServerTomlConfig {
    pub port: Option<u16>,
}

/// Logging configuration from config.toml
#[derive(Debug, Clone, Deserialize)]
struct LoggingTomlConfig {
    pub log_dir: Option<String>,
    pub level_filter: Option<String>,
    pub rotation: Option<String>, // "daily" or "hourly"
    pub console_timestamps: Option<bool>,
    pub file_json_format: Option<bool>,
    pub cleanup_days: Option<u32>,
}

/// Full TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
struct TomlConfig {
    pub database: PostgresConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    pub api: Option<ApiConfig>,
    pub server: Option<ServerTomlConfig>,
    pub logging: Option<LoggingTomlConfig>,
}

struct EngineConfig {
    postgres: PostgresConfig,
    backfill: BackfillConfig,
    api: ApiConfig,
    server_port: u16,
    logging: LoggingConfig,
    log_cleanup_days: u32,
}

impl EngineConfig {
    fn from_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let toml_config: TomlConfig = toml::from_str(&content)?;
        Ok(Self::from_toml_config(toml_config))
    }

    fn from_toml_config(toml_config: TomlConfig) -> Self {
        let (logging, log_cleanup_days) = match toml_config.logging {
            Some(log_config) => {
                let rotation = log_config
                    .rotation
                    .map(|r| match r.as_str() {
                        "hourly" => LogRotation::Hourly,
                        _ => LogRotation::Daily,
                    })
                    .unwrap_or(LogRotation::Daily);
                let config = LoggingConfig {
                    log_dir: log_config.log_dir.unwrap_or_else(|| "logs".to_string()),
                    level_filter: log_config
                        .level_filter
                        .unwrap_or_else(|| "info,gapfill=info".to_string()),
                    rotation,
                    console_timestamps: log_config.console_timestamps.unwrap_or(true),
                    file_json_format: log_config.file_json_format.unwrap_or(true),
                };
                (config, log_config.cleanup_days.unwrap_or(30))
            }
            None => (LoggingConfig::default(), 30),
        };

        Self {
            postgres: toml_config.database,
            backfill: toml_config.backfill,
            api: toml_config.api.unwrap_or_default(),
            server_port: toml_config.server.and_then(|s| s.port).unwrap_or(8080),
            logging,
            log_cleanup_days,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            backfill: BackfillConfig::default(),
            api: ApiConfig::default(),
            server_port: 8080,
            logging: LoggingConfig::default(),
            log_cleanup_days: 30,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path =
        std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = match EngineConfig::from_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("could not load {} ({}), using defaults", config_path, e);
            EngineConfig::default()
        }
    };

    let _log_guard = init_dual_logging(config.logging.clone())?;
    if let Err(e) = cleanup_old_logs(&config.logging.log_dir, config.log_cleanup_days) {
        warn!("log cleanup failed: {}", e);
    }

    info!(
        symbols = config.backfill.symbols.len(),
        kinds = config.backfill.series_kinds.len(),
        scan_interval_secs = config.backfill.scan_interval_secs,
        "starting gap detection and backfill engine"
    );

    let store = PostgresStore::connect(&config.postgres).await?;
    let source = BinanceFuturesClient::new(&config.api)?;

    let backfill = kameo::spawn(BackfillActor::new(store.clone(), source, config.backfill));

    start_status_server(config.server_port, store, backfill).await
}
