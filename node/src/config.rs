use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File as ConfigFile};

pub const DEFAULT_ADMIN_SECRET: &str = "changeme";
const DEFAULT_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: Option<PathBuf>,

    // Chat platform
    pub bot_token: Option<String>,
    pub bot_enabled: bool,
    pub api_base: String,
    pub poll_timeout: Duration,
    pub upstream_timeout: Duration,
    pub max_upload_bytes: u64,

    // HTTP
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub admin_secret: String,
    pub landing_delay: Duration,

    // Storage
    pub db_file: PathBuf,

    // Logging
    pub log_level: String,
    pub log_format: String,
}

impl AppConfig {
    /// Layer the optional config file under `FILELINK_*` variables, then fall
    /// back to the unprefixed variables of older deployments.
    pub fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = match config_path_override {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file {} not found (specified via --config)",
                        path.display()
                    );
                }
                Some(path)
            }
            None => None,
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(Environment::with_prefix("FILELINK"));
        let config = builder.build().context("failed to assemble configuration")?;

        let mut app = Self::from_config(&config, |key| std::env::var(key).ok())?;
        app.config_path = resolved_path;
        Ok(app)
    }

    pub(crate) fn from_config(config: &Config, fallback_env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let fallback = |key: &str| {
            fallback_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Self {
            config_path: None,
            bot_token: get_string_value(config, &["bot_token", "bot.token"])
                .or_else(|| fallback("BOT_TOKEN")),
            bot_enabled: get_bool_value(config, &["bot_enabled", "bot.enabled"], true),
            api_base: get_string_value(config, &["api_base", "bot.api_base"])
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            poll_timeout: Duration::from_secs(
                get_string_value(config, &["poll_timeout_secs", "bot.poll_timeout_secs"])
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("poll_timeout_secs must be a whole number of seconds")?,
            ),
            upstream_timeout: Duration::from_secs(
                get_string_value(config, &["upstream_timeout_secs", "relay.upstream_timeout_secs"])
                    .unwrap_or_else(|| "15".to_string())
                    .parse()
                    .context("upstream_timeout_secs must be a whole number of seconds")?,
            ),
            max_upload_bytes: get_string_value(config, &["max_upload_bytes", "bot.max_upload_bytes"])
                .unwrap_or_else(|| DEFAULT_MAX_UPLOAD_BYTES.to_string())
                .parse()
                .context("max_upload_bytes must be a byte count")?,
            host: get_string_value(config, &["host", "http.host"])
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get_string_value(config, &["port", "http.port"])
                .or_else(|| fallback("PORT"))
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .context("port must be a number between 0 and 65535")?,
            base_url: get_string_value(config, &["base_url", "http.base_url"])
                .or_else(|| fallback("RENDER_EXTERNAL_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            admin_secret: get_string_value(config, &["admin_secret", "admin.secret"])
                .or_else(|| fallback("ADMIN_SECRET"))
                .unwrap_or_else(|| DEFAULT_ADMIN_SECRET.to_string()),
            landing_delay: Duration::from_secs(
                get_string_value(config, &["landing_delay_secs", "http.landing_delay_secs"])
                    .unwrap_or_else(|| "10".to_string())
                    .parse()
                    .context("landing_delay_secs must be a whole number of seconds")?,
            ),
            db_file: get_string_value(config, &["db_file", "storage.db_file"])
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("database.json")),
            log_level: get_string_value(config, &["log_level", "log.level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(config, &["log_format", "log.format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin_secret.trim().is_empty() {
            anyhow::bail!("ADMIN_SECRET must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("PORT must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("MAX_UPLOAD_BYTES must be greater than zero");
        }
        if self.db_file.as_os_str().is_empty() {
            anyhow::bail!("DB_FILE must not be empty");
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("BASE_URL must be an http(s) URL, got {}", self.base_url);
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got {}", self.log_format);
        }
        if self.bot_enabled && self.bot_token.is_none() {
            anyhow::bail!("BOT_TOKEN must be set unless the bot is disabled (--no-bot)");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn db_file(&self) -> &Path {
        &self.db_file
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

fn get_bool_value(config: &Config, keys: &[&str], default: bool) -> bool {
    for key in keys {
        if let Ok(value) = config.get_bool(key) {
            return value;
        }
        if let Ok(raw) = config.get_string(key) {
            if let Ok(parsed) = raw.trim().parse::<bool>() {
                return parsed;
            }
        }
    }
    default
}
