//! Portal session client — CAS login, auth probe, logout.
//!
//! One instance owns one user's cookie state for the duration of one job.
//! Two reqwest clients share the jar: `http` follows the CAS redirect chain,
//! `probe` follows nothing (the auth probe and logout are status checks whose
//! redirects must not be chased).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header;
use reqwest::redirect::Policy;
use scraper::{Html, Selector};

use campusclock_core::config::PortalConfig;
use campusclock_core::error::{ClockError, Result};
use campusclock_core::types::User;
use campusclock_security::Vault;
use campusclock_store::ClockStore;

use crate::jar::SharedJar;

/// Authenticated session for one portal account.
pub struct SessionClient {
    user: User,
    portal: PortalConfig,
    jar: Arc<SharedJar>,
    http: reqwest::Client,
    probe: reqwest::Client,
    vault: Vault,
    /// `None` runs in standalone mode: fresh jar, nothing persisted.
    store: Option<Arc<ClockStore>>,
}

impl SessionClient {
    /// Build a session for `user`. With a store handle the jar is seeded
    /// from the user's persisted snapshot and written back on successful
    /// login; without one (standalone verification) the session starts
    /// fresh and touches no persistence.
    pub fn new(
        user: User,
        portal: PortalConfig,
        vault: Vault,
        store: Option<Arc<ClockStore>>,
    ) -> Result<Self> {
        let jar = match (&store, &user.cookie) {
            (Some(_), Some(snapshot)) => match SharedJar::from_json(snapshot) {
                Ok(jar) => Arc::new(jar),
                Err(e) => {
                    tracing::warn!("stale cookie snapshot for {}: {e}", user.username);
                    Arc::new(SharedJar::new())
                }
            },
            _ => Arc::new(SharedJar::new()),
        };

        let http = build_client(&portal, jar.clone(), true)?;
        let probe = build_client(&portal, jar.clone(), false)?;

        Ok(Self {
            user,
            portal,
            jar,
            http,
            probe,
            vault,
            store,
        })
    }

    /// Lightweight auth probe: 200 means the session is live. No redirects,
    /// no side effects.
    pub async fn is_authenticated(&self) -> Result<bool> {
        let resp = self
            .probe
            .get(self.portal.check_url())
            .header(header::REFERER, self.portal.platform_referer())
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Auth probe: {e}")))?;
        Ok(resp.status() == reqwest::StatusCode::OK)
    }

    /// Log in through the CAS flow.
    ///
    /// Idempotent: a live session short-circuits after the probe, unless
    /// `force` is set, which drops the local cookies first. On success in
    /// persisted mode the jar snapshot is written back to the user record
    /// (one write, last writer wins).
    pub async fn login(&mut self, force: bool) -> Result<()> {
        if force {
            self.jar.clear();
        } else if self.is_authenticated().await? {
            tracing::debug!("session for {} already live", self.user.username);
            return Ok(());
        }

        let login_url = self.portal.login_url();
        let page = self
            .http
            .get(&login_url)
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Login page: {e}")))?
            .text()
            .await
            .map_err(|e| ClockError::Transport(format!("Login page body: {e}")))?;

        // Scraped fresh on every call: the form embeds per-session
        // anti-forgery tokens, so nothing here may be cached.
        let mut form = extract_login_form(&page)?;

        let stamp = Utc::now().timestamp_millis();
        let captcha = self
            .http
            .get(self.portal.captcha_url(&self.user.username, stamp))
            .header(header::REFERER, login_url.as_str())
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Captcha probe: {e}")))?
            .text()
            .await
            .map_err(|e| ClockError::Transport(format!("Captcha probe body: {e}")))?;
        if captcha.trim() == "true" {
            return Err(ClockError::CaptchaRequired(self.user.username.clone()));
        }

        // Decrypted password lives only for the duration of this call.
        let password = self.vault.open(&self.user.password)?;
        set_field(&mut form, "username", &self.user.username);
        set_field(&mut form, "password", &password);

        self.http
            .post(&login_url)
            .header(header::ORIGIN, self.portal.ids_base.as_str())
            .header(header::REFERER, login_url.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Login submit: {e}")))?;

        if !self.is_authenticated().await? {
            return Err(ClockError::LoginFailed(format!(
                "portal rejected credentials for {}",
                self.user.username
            )));
        }

        if let Some(store) = &self.store {
            let id = store.ensure_user_id(&self.user.username)?;
            self.user.id = Some(id);
            let snapshot = self.jar.to_json()?;
            store.save_cookie(&self.user.username, &snapshot)?;
            self.user.cookie = Some(snapshot);
        }

        tracing::info!("🔐 logged in: {}", self.user.username);
        Ok(())
    }

    /// Log out of the portal. Local cookies are cleared regardless of
    /// whether the portal cooperated.
    pub async fn logout(&mut self) -> Result<()> {
        let result = self.logout_inner().await;
        self.jar.clear();
        result
    }

    async fn logout_inner(&self) -> Result<()> {
        if !self.is_authenticated().await? {
            return Ok(());
        }
        self.probe
            .get(self.portal.logout_url())
            .header(header::REFERER, format!("{}/", self.portal.portal_base))
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Logout: {e}")))?;
        if self.is_authenticated().await? {
            return Err(ClockError::LogoutFailed(format!(
                "portal still reports a live session for {}",
                self.user.username
            )));
        }
        tracing::info!("logged out: {}", self.user.username);
        Ok(())
    }

    /// The redirect-following client, for workflow calls that ride this
    /// session.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn portal(&self) -> &PortalConfig {
        &self.portal
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    /// Current jar snapshot as the opaque persisted form.
    pub fn cookie_snapshot(&self) -> Result<String> {
        self.jar.to_json()
    }
}

fn build_client(
    portal: &PortalConfig,
    jar: Arc<SharedJar>,
    follow_redirects: bool,
) -> Result<reqwest::Client> {
    let redirect = if follow_redirects {
        Policy::limited(10)
    } else {
        Policy::none()
    };
    reqwest::Client::builder()
        .cookie_provider(jar)
        .user_agent(portal.user_agent.clone())
        .timeout(Duration::from_secs(portal.timeout_secs))
        .danger_accept_invalid_certs(portal.accept_invalid_certs)
        .redirect(redirect)
        .build()
        .map_err(|e| ClockError::Transport(format!("HTTP client build: {e}")))
}

/// Scrape the CAS login form into opaque key/value pairs.
///
/// Synchronous on purpose: the parsed DOM is not `Send` and must not live
/// across an await point.
fn extract_login_form(html: &str) -> Result<Vec<(String, String)>> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("#casLoginForm input")
        .map_err(|_| ClockError::Portal("invalid login form selector".into()))?;

    let mut fields = Vec::new();
    for input in doc.select(&selector) {
        let el = input.value();
        let Some(name) = el.attr("name") else {
            continue;
        };
        if el
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("submit"))
        {
            continue;
        }
        fields.push((
            name.to_string(),
            el.attr("value").unwrap_or_default().to_string(),
        ));
    }

    if fields.is_empty() {
        return Err(ClockError::Portal(
            "CAS login form not found in page".into(),
        ));
    }
    Ok(fields)
}

fn set_field(form: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(entry) = form.iter_mut().find(|(n, _)| n == name) {
        entry.1 = value.to_string();
    } else {
        form.push((name.to_string(), value.to_string()));
    }
}
