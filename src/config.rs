use anyhow::{Context, Result, anyhow};
use consumer_core::OffsetReset;
use consumer_core::backoff::{DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub const BASE_SETTINGS_FILE: &str = "appsettings.json";
pub const ENVIRONMENT_VAR: &str = "APP_ENVIRONMENT";

const DEFAULT_SECURITY_PROTOCOL: &str = "PLAINTEXT";
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub kafka_brokers: String,
    pub kafka_group_id: String,
    pub kafka_topic: String,
    pub kafka_offset_reset: OffsetReset,
    pub kafka_client_id: Option<String>,
    pub kafka_security_protocol: String,
    pub kafka_sasl_mechanism: Option<String>,
    pub kafka_sasl_username: Option<String>,
    pub kafka_sasl_password: Option<String>,
    pub kafka_session_timeout_ms: u64,
    pub error_backoff_base_ms: u64,
    pub error_backoff_max_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SettingsFile {
    #[serde(default)]
    kafka: KafkaSettings,
    #[serde(default)]
    consumer: ConsumerSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KafkaSettings {
    group_id: Option<String>,
    bootstrap_servers: Option<String>,
    topic: Option<String>,
    auto_offset_reset: Option<String>,
    client_id: Option<String>,
    security_protocol: Option<String>,
    sasl_mechanism: Option<String>,
    sasl_username: Option<String>,
    sasl_password: Option<String>,
    session_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsumerSettings {
    error_backoff_base_ms: Option<u64>,
    error_backoff_max_ms: Option<u64>,
}

impl Config {
    /// Loads `appsettings.json` from the working directory, the optional
    /// `appsettings.{APP_ENVIRONMENT}.json` overlay, then env var overrides.
    pub fn from_env() -> Result<Self> {
        let base_dir = env::current_dir().context("resolve working directory")?;
        Self::load(&base_dir, |name| env::var(name).ok())
    }

    pub fn load(base_dir: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let environment = lookup(ENVIRONMENT_VAR);
        let settings = read_settings(base_dir, environment.as_deref())?;
        let SettingsFile { kafka, consumer } =
            serde_json::from_value(settings).context("decode layered settings")?;

        let offset_reset_raw = lookup("KAFKA_AUTO_OFFSET_RESET").or(kafka.auto_offset_reset);
        let kafka_offset_reset = match offset_reset_raw {
            Some(raw) => OffsetReset::from_str(&raw).map_err(|_| {
                anyhow!("invalid Kafka:AutoOffsetReset {raw:?}; expected earliest or latest")
            })?,
            None => OffsetReset::default(),
        };

        let config = Self {
            kafka_brokers: required(
                lookup("KAFKA_BROKERS"),
                kafka.bootstrap_servers,
                "Kafka:BootstrapServers",
                "KAFKA_BROKERS",
            )?,
            kafka_group_id: required(
                lookup("KAFKA_GROUP_ID"),
                kafka.group_id,
                "Kafka:GroupId",
                "KAFKA_GROUP_ID",
            )?,
            kafka_topic: required(
                lookup("KAFKA_TOPIC"),
                kafka.topic,
                "Kafka:Topic",
                "KAFKA_TOPIC",
            )?,
            kafka_offset_reset,
            kafka_client_id: optional(lookup("KAFKA_CLIENT_ID"), kafka.client_id),
            kafka_security_protocol: optional(
                lookup("KAFKA_SECURITY_PROTOCOL"),
                kafka.security_protocol,
            )
            .unwrap_or_else(|| DEFAULT_SECURITY_PROTOCOL.to_string()),
            kafka_sasl_mechanism: optional(lookup("KAFKA_SASL_MECHANISM"), kafka.sasl_mechanism),
            kafka_sasl_username: optional(lookup("KAFKA_SASL_USERNAME"), kafka.sasl_username),
            kafka_sasl_password: optional(lookup("KAFKA_SASL_PASSWORD"), kafka.sasl_password),
            kafka_session_timeout_ms: env_u64(&lookup, "KAFKA_SESSION_TIMEOUT_MS")?
                .or(kafka.session_timeout_ms)
                .unwrap_or(DEFAULT_SESSION_TIMEOUT_MS),
            error_backoff_base_ms: env_u64(&lookup, "CONSUMER_ERROR_BACKOFF_BASE_MS")?
                .or(consumer.error_backoff_base_ms)
                .unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            error_backoff_max_ms: env_u64(&lookup, "CONSUMER_ERROR_BACKOFF_MAX_MS")?
                .or(consumer.error_backoff_max_ms)
                .unwrap_or(DEFAULT_BACKOFF_MAX_MS),
        };

        if config.kafka_session_timeout_ms == 0 {
            return Err(anyhow!("Kafka:SessionTimeoutMs must be greater than 0"));
        }

        if config.error_backoff_max_ms < config.error_backoff_base_ms {
            return Err(anyhow!(
                "Consumer:ErrorBackoffMaxMs must be at least Consumer:ErrorBackoffBaseMs"
            ));
        }

        if config.kafka_sasl_username.is_some() != config.kafka_sasl_password.is_some() {
            return Err(anyhow!(
                "Kafka:SaslUsername and Kafka:SaslPassword must be set together"
            ));
        }

        Ok(config)
    }
}

fn read_settings(base_dir: &Path, environment: Option<&str>) -> Result<Value> {
    let mut settings = read_json(&base_dir.join(BASE_SETTINGS_FILE))?;

    if let Some(environment) = environment {
        let overlay_path = base_dir.join(format!("appsettings.{environment}.json"));
        if overlay_path.is_file() {
            merge_json(&mut settings, read_json(&overlay_path)?);
        } else {
            debug!(path = %overlay_path.display(), "no environment settings overlay");
        }
    }

    Ok(settings)
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read settings file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse settings file {}", path.display()))
}

/// Objects merge key by key; any other overlay value replaces the base.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn required(
    from_env: Option<String>,
    from_file: Option<String>,
    setting: &str,
    env_name: &str,
) -> Result<String> {
    optional(from_env, from_file)
        .ok_or_else(|| anyhow!("missing required setting {setting} (or env var {env_name})"))
}

fn optional(from_env: Option<String>, from_file: Option<String>) -> Option<String> {
    from_env
        .or(from_file)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid u64 for {name}"))
        })
        .transpose()
}
