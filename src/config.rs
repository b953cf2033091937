//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::PaymentMethod;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub telegram: TelegramConfig,
    pub storefront: StorefrontConfig,
    pub workers: WorkerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub run_migrations: bool,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub redis_url: String,
    pub products_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Access token verification settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: Option<String>,
}

/// Telegram bot settings. The bot is optional; without a token the
/// service falls back to log-only notifications.
#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub admin_chat_id: Option<i64>,
    pub webhook_secret: Option<String>,
    pub callback_secret: String,
    pub api_base_url: String,
    pub request_timeout: u64, // seconds
    pub max_retries: u32,
    /// Telegram user id -> admin user id
    pub admins: HashMap<i64, Uuid>,
}

/// Storefront business settings
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub mmk_per_credit: i64,
    pub min_credit_purchase: i64,
    pub max_credit_purchase: i64,
    pub upload_dir: PathBuf,
    pub max_proof_bytes: usize,
    pub wallet_accounts: HashMap<PaymentMethod, String>,
}

/// Background worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 0 disables the reconciliation worker
    pub reconciliation_interval: u64, // seconds
    pub reconciliation_batch: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            telegram: TelegramConfig::from_env()?,
            storefront: StorefrontConfig::from_env()?,
            workers: WorkerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        self.auth.validate()?;
        self.telegram.validate()?;
        self.storefront.validate()?;

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn bool_var(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost,http://127.0.0.1".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "2")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            run_migrations: bool_var("RUN_MIGRATIONS", false),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            enabled: !bool_var("SKIP_CACHE", false),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            products_ttl: parse_var("CACHE_PRODUCTS_TTL", "60")?,
            max_connections: parse_var("CACHE_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }

        if self.redis_url.is_empty() {
            return Err(ConfigError::InvalidValue("REDIS_URL".to_string()));
        }

        // Basic validation of Redis URL format
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AuthConfig {
            jwt_secret: env::var("AUTH_JWT_SECRET")
                .map_err(|_| ConfigError::MissingVariable("AUTH_JWT_SECRET".to_string()))?,
            jwt_audience: match env::var("AUTH_JWT_AUDIENCE") {
                Ok(aud) if aud.trim().is_empty() => None,
                Ok(aud) => Some(aud),
                Err(_) => Some("authenticated".to_string()),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::InvalidValue(
                "AUTH_JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl TelegramConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_chat_id = match env::var("TELEGRAM_ADMIN_CHAT_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("TELEGRAM_ADMIN_CHAT_ID".to_string()))?,
            ),
            _ => None,
        };

        let admins = match env::var("TELEGRAM_ADMINS") {
            Ok(raw) => parse_admin_bindings(&raw)?,
            Err(_) => HashMap::new(),
        };

        Ok(TelegramConfig {
            bot_token: env::var("TELEGRAM_BOT_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            admin_chat_id,
            webhook_secret: env::var("TELEGRAM_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            callback_secret: env::var("TELEGRAM_CALLBACK_SECRET").unwrap_or_default(),
            api_base_url: env::var("TELEGRAM_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            request_timeout: parse_var("TELEGRAM_REQUEST_TIMEOUT", "10")?,
            max_retries: parse_var("TELEGRAM_MAX_RETRIES", "2")?,
            admins,
        })
    }

    /// Notifications go out only when both the token and the chat are known
    pub fn is_enabled(&self) -> bool {
        self.bot_token.is_some() && self.admin_chat_id.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_enabled() {
            return Ok(());
        }

        if self.callback_secret.len() < 16 {
            return Err(ConfigError::InvalidValue(
                "TELEGRAM_CALLBACK_SECRET must be at least 16 characters".to_string(),
            ));
        }

        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "TELEGRAM_API_BASE_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parses `tg_id:uuid,tg_id:uuid`
pub fn parse_admin_bindings(raw: &str) -> Result<HashMap<i64, Uuid>, ConfigError> {
    let mut bindings = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (tg_id, user_id) = pair
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidValue(format!("TELEGRAM_ADMINS entry '{}'", pair)))?;
        let tg_id: i64 = tg_id
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("TELEGRAM_ADMINS entry '{}'", pair)))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| ConfigError::InvalidValue(format!("TELEGRAM_ADMINS entry '{}'", pair)))?;
        bindings.insert(tg_id, user_id);
    }
    Ok(bindings)
}

impl StorefrontConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut wallet_accounts = HashMap::new();
        for method in PaymentMethod::ALL.iter().copied() {
            let key = format!("PAYMENT_ACCOUNT_{}", method.as_str().to_uppercase());
            if let Ok(account) = env::var(&key) {
                if !account.trim().is_empty() {
                    wallet_accounts.insert(method, account.trim().to_string());
                }
            }
        }

        Ok(StorefrontConfig {
            mmk_per_credit: parse_var("MMK_PER_CREDIT", "1")?,
            min_credit_purchase: parse_var("MIN_CREDIT_PURCHASE", "1000")?,
            max_credit_purchase: parse_var("MAX_CREDIT_PURCHASE", "1000000")?,
            upload_dir: PathBuf::from(
                env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            ),
            max_proof_bytes: parse_var("MAX_PROOF_BYTES", "5242880")?,
            wallet_accounts,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mmk_per_credit <= 0 {
            return Err(ConfigError::InvalidValue("MMK_PER_CREDIT".to_string()));
        }

        if self.min_credit_purchase <= 0 || self.min_credit_purchase > self.max_credit_purchase {
            return Err(ConfigError::InvalidValue(
                "MIN_CREDIT_PURCHASE must be positive and <= MAX_CREDIT_PURCHASE".to_string(),
            ));
        }

        if self.max_proof_bytes == 0 {
            return Err(ConfigError::InvalidValue("MAX_PROOF_BYTES".to_string()));
        }

        Ok(())
    }
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            mmk_per_credit: 1,
            min_credit_purchase: 1000,
            max_credit_purchase: 1_000_000,
            upload_dir: PathBuf::from("./uploads"),
            max_proof_bytes: 5 * 1024 * 1024,
            wallet_accounts: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WorkerConfig {
            reconciliation_interval: parse_var("RECONCILIATION_INTERVAL_SECS", "3600")?,
            reconciliation_batch: parse_var("RECONCILIATION_BATCH", "500")?,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_allowed_origins: vec!["http://localhost".to_string()],
        };

        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_allowed_origins: vec![],
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_cache_skips_url_check() {
        let config = CacheConfig {
            enabled: false,
            redis_url: "not-a-url".to_string(),
            products_ttl: 60,
            max_connections: 10,
        };
        assert!(config.validate().is_ok());

        let config = CacheConfig {
            enabled: true,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_admin_bindings() {
        let id = Uuid::new_v4();
        let bindings = parse_admin_bindings(&format!("12345:{}, ", id)).unwrap();
        assert_eq!(bindings.get(&12345), Some(&id));

        assert!(parse_admin_bindings("12345").is_err());
        assert!(parse_admin_bindings("abc:not-a-uuid").is_err());
        assert!(parse_admin_bindings("").unwrap().is_empty());
    }

    #[test]
    fn test_storefront_limits_validation() {
        let mut config = StorefrontConfig::default();
        assert!(config.validate().is_ok());

        config.min_credit_purchase = config.max_credit_purchase + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telegram_disabled_without_token() {
        let config = TelegramConfig {
            admin_chat_id: Some(-100),
            ..Default::default()
        };
        assert!(!config.is_enabled());
        assert!(config.validate().is_ok());
    }
}
