//! # Configuration Module
//!
//! Settings are read from the process environment (a `.env` file is loaded
//! by `main` first). `Settings::from_lookup` takes any key lookup so the
//! parsing can be exercised without touching the real environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_PRICE_MULTIPLIER: f64 = 0.6;
pub const DEFAULT_CATALOG_TTL_SECS: u64 = 600;
pub const DEFAULT_LEAD_TITLE: &str = "Новый лид из тг-бота";

/// How updates reach the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    Polling,
    Webhook,
}

/// Where dialogue state is kept between updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageType {
    Memory,
    Json { path: String },
    Postgres { url: String },
    Redis { url: String },
}

/// Where the course catalog comes from
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogSourceKind {
    Api {
        base_url: String,
        login: Option<String>,
        password: Option<String>,
    },
    Sheet {
        spreadsheet_id: String,
        range: String,
        api_key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Webhook listener settings
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSettings {
    /// Public origin Telegram posts to, e.g. `https://bot.example.com`
    pub host: String,
    pub path: String,
    /// Local bind address of the listener
    pub bind: SocketAddr,
    /// Register the webhook URL with Telegram on startup
    pub set_webhook: bool,
}

impl WebhookSettings {
    pub fn webhook_url(&self) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), self.path)
    }
}

/// Admin HTTP API settings
#[derive(Debug, Clone, PartialEq)]
pub struct AdminSettings {
    pub bind: SocketAddr,
    pub login: String,
    pub password: String,
}

/// Bitrix24 inbound webhook settings
#[derive(Debug, Clone, PartialEq)]
pub struct BitrixSettings {
    /// Base webhook URL, e.g. `https://example.bitrix24.ru/rest/1/secret/`
    pub webhook_url: String,
    pub logs_folder_id: Option<u64>,
    pub lead_title: String,
}

/// Sematext log receiver settings
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLogSettings {
    pub receiver_url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub telegram_bot_token: String,
    pub bot_mode: BotMode,
    pub webhook: Option<WebhookSettings>,
    pub set_commands: bool,
    pub storage: StorageType,
    pub catalog: CatalogSourceKind,
    pub catalog_ttl: Duration,
    pub bitrix: Option<BitrixSettings>,
    pub price_multiplier: f64,
    pub action_log: Option<ActionLogSettings>,
    pub admin: Option<AdminSettings>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let telegram_bot_token = require("TELEGRAM_BOT_TOKEN")?;

        let bot_mode = match get("BOT_MODE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("polling") => BotMode::Polling,
            Some("webhook") => BotMode::Webhook,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "BOT_MODE",
                    value: other.to_string(),
                })
            }
        };

        let webhook = if bot_mode == BotMode::Webhook {
            let host = get("WEBAPP_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
            let port: u16 = parse_or("WEBAPP_PORT", get("WEBAPP_PORT"), 8080)?;
            let bind = parse_socket_addr("WEBAPP_HOST", &format!("{host}:{port}"))?;
            let mut path = get("WEBHOOK_PATH").unwrap_or_else(|| "/api".to_string());
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
            Some(WebhookSettings {
                host: require("WEBHOOK_HOST")?,
                path,
                bind,
                set_webhook: parse_bool("SET_WEBHOOK", get("SET_WEBHOOK"), true)?,
            })
        } else {
            None
        };

        let storage = match get("STORAGE_TYPE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("memory") => StorageType::Memory,
            Some("json") => StorageType::Json {
                path: get("STATE_STORAGE_PATH").unwrap_or_else(|| "states.json".to_string()),
            },
            Some("postgres") => StorageType::Postgres {
                url: require("DATABASE_URL")?,
            },
            Some("redis") => StorageType::Redis {
                url: require("REDIS_URL")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_TYPE",
                    value: other.to_string(),
                })
            }
        };

        let catalog = match get("CATALOG_SOURCE").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("api") => CatalogSourceKind::Api {
                base_url: require("CATALOG_API_URL")?,
                login: get("CATALOG_API_LOGIN"),
                password: get("CATALOG_API_PASSWORD"),
            },
            Some("sheet") => CatalogSourceKind::Sheet {
                spreadsheet_id: require("SPREADSHEET_ID")?,
                range: get("SHEET_RANGE").unwrap_or_else(|| "A:Z".to_string()),
                api_key: require("GOOGLE_API_KEY")?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "CATALOG_SOURCE",
                    value: other.to_string(),
                })
            }
        };

        let catalog_ttl = Duration::from_secs(parse_or(
            "CATALOG_TTL_SECS",
            get("CATALOG_TTL_SECS"),
            DEFAULT_CATALOG_TTL_SECS,
        )?);

        let bitrix = match get("BITRIX_WEBHOOK_URL") {
            Some(webhook_url) => Some(BitrixSettings {
                webhook_url,
                logs_folder_id: get("BITRIX_LOGS_FOLDER_ID")
                    .map(|v| parse_value("BITRIX_LOGS_FOLDER_ID", &v))
                    .transpose()?,
                lead_title: get("LEAD_TITLE").unwrap_or_else(|| DEFAULT_LEAD_TITLE.to_string()),
            }),
            None => None,
        };

        let price_multiplier: f64 = parse_or(
            "PRICE_MULTIPLIER",
            get("PRICE_MULTIPLIER"),
            DEFAULT_PRICE_MULTIPLIER,
        )?;
        if !(price_multiplier.is_finite() && price_multiplier > 0.0) {
            return Err(ConfigError::Invalid {
                key: "PRICE_MULTIPLIER",
                value: price_multiplier.to_string(),
            });
        }

        let action_log = match (get("SEMATEXT_RECEIVER_URL"), get("SEMATEXT_TOKEN")) {
            (Some(receiver_url), Some(token)) => Some(ActionLogSettings { receiver_url, token }),
            _ => None,
        };

        let admin = match (get("ADMIN_LOGIN"), get("ADMIN_PASSWORD")) {
            (Some(login), Some(password)) => Some(AdminSettings {
                bind: parse_socket_addr(
                    "ADMIN_ADDR",
                    &get("ADMIN_ADDR").unwrap_or_else(|| "127.0.0.1:8081".to_string()),
                )?,
                login,
                password,
            }),
            _ => None,
        };

        let log_format = match get("LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            telegram_bot_token,
            bot_mode,
            webhook,
            set_commands: parse_bool("SET_COMMANDS", get("SET_COMMANDS"), true)?,
            storage,
            catalog,
            catalog_ttl,
            bitrix,
            price_multiplier,
            action_log,
            admin,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_or<T: FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_socket_addr(key: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    parse_value(key, value)
}

fn parse_bool(
    key: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
        }),
    }
}
