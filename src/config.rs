use std::{env, str::FromStr, time::Duration};

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use tracing::Level;

use crate::pipeline::{DEFAULT_LIMIT, select::StrategyKind};
use crate::queue::rabbit::amqp_uri;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone)]
pub struct Config {
    database: PgConnectOptions,
    db_max_connections: u32,
    db_acquire_timeout: Duration,
    rabbit_uri: String,
    rabbit_queue: String,
    redis_url: String,
    selection_strategy: StrategyKind,
    digest_limit: usize,
    verbosity: u8,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からワーカーの設定値を読み込み、検証する。
    ///
    /// 接続先URLが直接指定されていない場合は、ホスト・ポート等の個別の変数から組み立てる。
    ///
    /// # Errors
    /// `DIGEST_RABBIT_QUEUE` が未設定、DSNを組み立てるための認証情報が不足している、
    /// もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database = match env::var("DIGEST_DATABASE_URL") {
            Ok(url) => {
                PgConnectOptions::from_str(&url).map_err(|error| ConfigError::Invalid {
                    name: "DIGEST_DATABASE_URL",
                    source: anyhow::Error::new(error),
                })?
            }
            Err(_) => database_options_from_parts()?,
        };
        let db_max_connections = parse_u32("DIGEST_DB_MAX_CONNECTIONS", 1)?;
        let db_acquire_timeout = parse_duration_secs("DIGEST_DB_ACQUIRE_TIMEOUT_SECS", 30)?;

        let rabbit_host = env::var("DIGEST_RABBIT_HOST").unwrap_or_else(|_| "localhost".to_string());
        let rabbit_port = parse_u16("DIGEST_RABBIT_PORT", 5672)?;
        let rabbit_username = env::var("DIGEST_RABBIT_USERNAME").ok();
        let rabbit_password = env::var("DIGEST_RABBIT_PASSWORD").ok();
        // ユーザー名とパスワードが両方揃っている場合のみ認証情報を使う
        let credentials = rabbit_username
            .as_deref()
            .zip(rabbit_password.as_deref());
        let rabbit_uri = amqp_uri(&rabbit_host, rabbit_port, credentials);
        let rabbit_queue = env_var("DIGEST_RABBIT_QUEUE")?;

        let redis_url = match env::var("DIGEST_REDIS_URL") {
            Ok(url) => url,
            Err(_) => assemble_redis_url()?,
        };

        let selection_strategy = parse_strategy("DIGEST_SELECTION_STRATEGY")?;
        let digest_limit = parse_usize("DIGEST_LIMIT", DEFAULT_LIMIT)?;
        let verbosity = parse_u8("DIGEST_VERBOSITY", 0)?;

        // OpenTelemetry settings
        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty());
        let otel_sampling_ratio = parse_f64("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            database,
            db_max_connections,
            db_acquire_timeout,
            rabbit_uri,
            rabbit_queue,
            redis_url,
            selection_strategy,
            digest_limit,
            verbosity,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    /// 接続先。認証情報はURLを経由せずに保持する。
    #[must_use]
    pub fn database(&self) -> &PgConnectOptions {
        &self.database
    }

    #[must_use]
    pub fn db_max_connections(&self) -> u32 {
        self.db_max_connections
    }

    #[must_use]
    pub fn db_acquire_timeout(&self) -> Duration {
        self.db_acquire_timeout
    }

    #[must_use]
    pub fn rabbit_uri(&self) -> &str {
        &self.rabbit_uri
    }

    #[must_use]
    pub fn rabbit_queue(&self) -> &str {
        &self.rabbit_queue
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    #[must_use]
    pub fn selection_strategy(&self) -> StrategyKind {
        self.selection_strategy
    }

    #[must_use]
    pub fn digest_limit(&self) -> usize {
        self.digest_limit
    }

    /// `RUST_LOG` が未設定のときに使うログレベル。
    #[must_use]
    pub fn log_level(&self) -> Level {
        match self.verbosity {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            _ => Level::DEBUG,
        }
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }
}

// ユーザー名・パスワードは予約文字を含み得るため、DSN文字列に埋め込まず個別に設定する
fn database_options_from_parts() -> Result<PgConnectOptions, ConfigError> {
    let user = env_var("POSTGRES_USER")?;
    let password = env_var("POSTGRES_PASSWORD")?;
    let database = env_var("POSTGRES_DB")?;
    let host = env::var("DIGEST_POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = parse_u16("DIGEST_POSTGRES_PORT", 5432)?;
    Ok(PgConnectOptions::new_without_pgpass()
        .host(&host)
        .port(port)
        .username(&user)
        .password(&password)
        .database(&database))
}

fn assemble_redis_url() -> Result<String, ConfigError> {
    let host = env::var("DIGEST_REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = parse_u16("DIGEST_REDIS_PORT", 6379)?;
    let db = parse_u32("DIGEST_REDIS_DB", 0)?;
    Ok(format!("redis://{host}:{port}/{db}"))
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_strategy(name: &'static str) -> Result<StrategyKind, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|error| ConfigError::Invalid {
            name,
            source: anyhow::Error::new(error),
        }),
        Err(_) => Ok(StrategyKind::default()),
    }
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default_secs.to_string());
    let secs = raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    Ok(Duration::from_secs(secs))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u8(name: &'static str, default: u8) -> Result<u8, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u8>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u16(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u16>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let value = raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be between 0.0 and 1.0"),
        });
    }
    Ok(value)
}
