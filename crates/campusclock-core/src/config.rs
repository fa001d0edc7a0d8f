//! CampusClock configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ClockError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AppConfig {
    /// Load config from the default path (~/.campusclock/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClockError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ClockError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ClockError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the CampusClock home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".campusclock")
    }
}

/// Portal endpoints and HTTP behavior.
///
/// The two base URLs exist so tests can point both at a local fake portal;
/// every endpoint is assembled from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// CAS identity server base.
    #[serde(default = "default_ids_base")]
    pub ids_base: String,
    /// Student portal base.
    #[serde(default = "default_portal_base")]
    pub portal_base: String,
    /// The check-in application id on the portal.
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout. Expiry maps to a transport failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// The campus portal's certificate chain does not always validate.
    #[serde(default = "bool_true")]
    pub accept_invalid_certs: bool,
    /// Portal timestamps are naive local strings in this offset.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
}

fn default_ids_base() -> String {
    "https://ids.xmu.edu.cn".into()
}
fn default_portal_base() -> String {
    "https://xmuxg.xmu.edu.cn".into()
}
fn default_app_id() -> u32 {
    214
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36"
        .into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_utc_offset() -> i32 {
    8
}
fn bool_true() -> bool {
    true
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            ids_base: default_ids_base(),
            portal_base: default_portal_base(),
            app_id: default_app_id(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: true,
            utc_offset_hours: default_utc_offset(),
        }
    }
}

impl PortalConfig {
    /// CAS login page / form submission endpoint.
    pub fn login_url(&self) -> String {
        format!(
            "{}/authserver/login?service={}/login/cas/xmu",
            self.ids_base, self.portal_base
        )
    }

    /// Captcha-required probe, keyed by username and a cache-busting stamp.
    pub fn captcha_url(&self, username: &str, stamp: i64) -> String {
        format!(
            "{}/authserver/needCaptcha.html?username={username}&_={stamp}",
            self.ids_base
        )
    }

    pub fn logout_url(&self) -> String {
        format!(
            "{}/authserver/logout?service={}/xmu/login",
            self.ids_base, self.portal_base
        )
    }

    /// Lightweight auth probe; 200 means the session is live.
    pub fn check_url(&self) -> String {
        format!("{}/login/check", self.portal_base)
    }

    pub fn business_url(&self) -> String {
        format!(
            "{}/api/app/{}/business/now?getFirst=true",
            self.portal_base, self.app_id
        )
    }

    pub fn instance_url(&self, business_id: &str) -> String {
        format!(
            "{}/api/formEngine/business/{business_id}/myFormInstance",
            self.portal_base
        )
    }

    pub fn submit_url(&self, instance_id: &str) -> String {
        format!("{}/api/formEngine/formInstance/{instance_id}", self.portal_base)
    }

    /// Referer the portal expects on API calls.
    pub fn app_referer(&self) -> String {
        format!("{}/app/{}", self.portal_base, self.app_id)
    }

    pub fn platform_referer(&self) -> String {
        format!("{}/platform", self.portal_base)
    }
}

/// Daily trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Wall-clock fire time "HH:MM", in the portal's offset.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
}

fn default_daily_at() -> String {
    "08:00".into()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
        }
    }
}

/// Persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.campusclock/campusclock.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Credential encryption at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Encrypt stored passwords with the machine-derived key.
    #[serde(default = "bool_true")]
    pub encrypt: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { encrypt: true }
    }
}

/// Notification delivery.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: Option<EmailNotifyConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookNotifyConfig>,
}

/// SMTP delivery, one mail per terminal attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailNotifyConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Sender address, also the SMTP username.
    pub from: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

/// Generic HTTP webhook — POST with a JSON body per terminal attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotifyConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub url: String,
}
