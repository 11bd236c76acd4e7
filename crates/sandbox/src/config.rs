//! Sandbox configuration loaded from environment variables.

use purchases::{PlatformInfo, PurchasesConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `APP_USER_ID` — subscriber the orchestrator acts for (default: `"sandbox-user"`)
/// - `SANDBOX_STREAM_AVAILABLE` — whether purchases use the stream source (default: `true`)
/// - `SANDBOX_AUTO_APPROVE` — answer queued legacy payments as purchased (default: `true`)
/// - `SANDBOX_OS_VERSION` — OS major version reported to redemption routing (default: `17`)
///
/// Orchestrator settings come from [`PurchasesConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub app_user_id: String,
    pub stream_available: bool,
    pub auto_approve: bool,
    pub platform: PlatformInfo,
    pub purchases: PurchasesConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            app_user_id: std::env::var("APP_USER_ID").unwrap_or(defaults.app_user_id),
            stream_available: env_flag("SANDBOX_STREAM_AVAILABLE")
                .unwrap_or(defaults.stream_available),
            auto_approve: env_flag("SANDBOX_AUTO_APPROVE").unwrap_or(defaults.auto_approve),
            platform: PlatformInfo {
                os_major_version: std::env::var("SANDBOX_OS_VERSION")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.platform.os_major_version),
                is_mobile_app_on_desktop: false,
            },
            purchases: PurchasesConfig::from_env(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            app_user_id: "sandbox-user".to_string(),
            stream_available: true,
            auto_approve: true,
            platform: PlatformInfo {
                os_major_version: 17,
                is_mobile_app_on_desktop: false,
            },
            purchases: PurchasesConfig::default(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
}
