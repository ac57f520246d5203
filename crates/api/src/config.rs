//! Application configuration loaded from environment variables.

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for text
/// - `DATABASE_URL`: PostgreSQL local store; in-memory when unset
/// - `API_BASE_URL`: backend for carts, providers and reservations
/// - `BANK_GATEWAY_URL`: base of the bank payment URLs
/// - `PUBLIC_BASE_URL`: where the bank can reach this server, used for
///   the default return and notification URLs
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub api_base_url: String,
    pub bank_gateway_url: String,
    pub public_base_url: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: non_empty("LOG_FORMAT")
                .map(|f| LogFormat::parse(&f))
                .unwrap_or(defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            api_base_url: non_empty("API_BASE_URL").unwrap_or(defaults.api_base_url),
            bank_gateway_url: non_empty("BANK_GATEWAY_URL").unwrap_or(defaults.bank_gateway_url),
            public_base_url: non_empty("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where the bank sends the customer back to.
    pub fn return_url(&self) -> String {
        format!("{}/payments/return", self.public_base_url.trim_end_matches('/'))
    }

    /// Where the bank posts its notification.
    pub fn notification_url(&self) -> String {
        format!(
            "{}/payments/notifications",
            self.public_base_url.trim_end_matches('/')
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            api_base_url: "http://localhost:8080/api".to_string(),
            bank_gateway_url: "https://bank.example.test".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}
