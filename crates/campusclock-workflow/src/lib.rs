//! # CampusClock Workflow
//! One check-in pass over an authenticated session: find the open business,
//! validate the time window, patch the two tracked fields, submit, and
//! verify the echo. Single pass, no internal retries.

pub mod types;

use chrono::{DateTime, Utc};
use reqwest::header;
use serde_json::json;

use campusclock_core::error::{ClockError, Result};
use campusclock_core::types::ClockOutcome;
use campusclock_session::SessionClient;

use types::{
    Business, BusinessNow, FormField, FormInstanceEnvelope, SubmitResponse, FIELD_INTEGRITY_PLEDGE,
    FIELD_SELF_REPORTED, OWNER_NODE, VALUE_YES, VALUE_YES_BILINGUAL,
};

/// Where `now` falls relative to the owner's submission window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Open,
    NotYetOpen,
    Expired,
}

/// A value to write into one tracked field before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFill {
    pub name: String,
    pub value: serde_json::Value,
}

/// The two fixed affirmative answers the check-in requires.
pub fn default_fills() -> Vec<FieldFill> {
    vec![
        FieldFill {
            name: FIELD_SELF_REPORTED.into(),
            value: json!({ "stringValue": VALUE_YES }),
        },
        FieldFill {
            name: FIELD_INTEGRITY_PLEDGE.into(),
            value: json!({ "stringValue": VALUE_YES_BILINGUAL }),
        },
    ]
}

/// One check-in attempt riding an already-authenticated session.
pub struct ClockWorkflow<'a> {
    session: &'a SessionClient,
    fills: Vec<FieldFill>,
}

impl<'a> ClockWorkflow<'a> {
    pub fn new(session: &'a SessionClient) -> Self {
        Self {
            session,
            fills: default_fills(),
        }
    }

    /// Override the tracked-field values (tests).
    pub fn with_fills(session: &'a SessionClient, fills: Vec<FieldFill>) -> Self {
        Self { session, fills }
    }

    /// Run the whole pass. Benign window states come back as `Ok` outcomes;
    /// everything else is a typed error for the executor to translate.
    pub async fn clock(&self) -> Result<ClockOutcome> {
        let portal = self.session.portal();
        let http = self.session.http();

        // 1. Current business.
        let now_resp = http
            .get(portal.business_url())
            .header(header::REFERER, portal.app_referer())
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Business lookup: {e}")))?
            .error_for_status()
            .map_err(|e| ClockError::Transport(format!("Business lookup: {e}")))?;
        let businesses: BusinessNow = now_resp
            .json()
            .await
            .map_err(|e| ClockError::Portal(format!("Business response: {e}")))?;
        let business = businesses
            .data
            .into_iter()
            .next()
            .ok_or(ClockError::NoOpenBusiness)?
            .business;

        // 2. Window eligibility.
        match eligibility(&business, Utc::now(), portal.utc_offset_hours)? {
            Eligibility::NotYetOpen => {
                tracing::info!(
                    "business {} not yet open for {}",
                    business.id,
                    self.session.username()
                );
                return Ok(ClockOutcome::NotYetOpen);
            }
            Eligibility::Expired => {
                tracing::info!(
                    "business {} already closed for {}",
                    business.id,
                    self.session.username()
                );
                return Ok(ClockOutcome::WindowExpired);
            }
            Eligibility::Open => {}
        }

        // 3. The user's form instance.
        let instance_resp = http
            .get(portal.instance_url(&business.id))
            .header(header::REFERER, portal.app_referer())
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Form instance: {e}")))?
            .error_for_status()
            .map_err(|e| ClockError::Transport(format!("Form instance: {e}")))?;
        let envelope: FormInstanceEnvelope = instance_resp
            .json()
            .await
            .map_err(|e| ClockError::Portal(format!("Form instance response: {e}")))?;
        let instance = envelope.data;
        if !instance.editable {
            return Err(ClockError::ClockForbidden(format!(
                "form instance {} is not editable (already submitted or no permission)",
                instance.id
            )));
        }

        // 4. Patch the tracked fields; everything else round-trips verbatim.
        let mut form_data = instance.form_data;
        patch_fields(&mut form_data, &self.fills);

        // 5. Submit.
        let submit_resp = http
            .post(portal.submit_url(&instance.id))
            .header(header::ORIGIN, portal.portal_base.as_str())
            .header(header::REFERER, portal.app_referer())
            .json(&json!({ "formData": form_data, "playerId": OWNER_NODE }))
            .send()
            .await
            .map_err(|e| ClockError::Transport(format!("Submit: {e}")))?
            .error_for_status()
            .map_err(|e| ClockError::Transport(format!("Submit: {e}")))?;

        // 6. Verify the echo. A 2xx alone proves nothing: the portal can
        // silently drop or partially apply a submission.
        let echo: SubmitResponse = submit_resp
            .json()
            .await
            .map_err(|e| ClockError::Portal(format!("Submit response: {e}")))?;
        let echoed = echo.echoed_fields().ok_or_else(|| {
            ClockError::Portal("submit response did not echo formData".into())
        })?;
        verify_echo(&echoed, &self.fills)?;

        tracing::info!("✅ check-in verified for {}", self.session.username());
        Ok(ClockOutcome::Submitted)
    }
}

/// Pure window math over the business's time list.
///
/// The owner node's start must exist and be in the past; the deadline is the
/// owner node's end, falling back to the business end, and must be in the
/// future. A missing owner node is a portal shape error, not a closed window.
pub fn eligibility(
    business: &Business,
    now: DateTime<Utc>,
    utc_offset_hours: i32,
) -> Result<Eligibility> {
    let owner = business
        .business_time_list
        .iter()
        .find(|node| node.node_id == OWNER_NODE)
        .ok_or_else(|| ClockError::Portal("business has no owner time node".into()))?;

    let start = owner
        .start_date
        .as_deref()
        .and_then(|s| types::parse_portal_time(s, utc_offset_hours));
    match start {
        None => return Ok(Eligibility::NotYetOpen),
        Some(start) if start > now => return Ok(Eligibility::NotYetOpen),
        Some(_) => {}
    }

    let deadline = owner
        .end_date
        .as_deref()
        .and_then(|s| types::parse_portal_time(s, utc_offset_hours))
        .or_else(|| {
            business
                .end_time
                .as_deref()
                .and_then(|s| types::parse_portal_time(s, utc_offset_hours))
        });
    match deadline {
        Some(deadline) if deadline > now => Ok(Eligibility::Open),
        _ => Ok(Eligibility::Expired),
    }
}

/// Replace the values of the tracked fields in place; untouched fields keep
/// their records byte-for-byte.
pub fn patch_fields(form_data: &mut [FormField], fills: &[FieldFill]) {
    for field in form_data.iter_mut() {
        if let Some(fill) = fills.iter().find(|f| f.name == field.name) {
            field.value = fill.value.clone();
        }
    }
}

/// Compare the echoed values against what was submitted for every tracked
/// field. Any mismatch means the submission did not stick.
pub fn verify_echo(echoed: &[FormField], fills: &[FieldFill]) -> Result<()> {
    for fill in fills {
        let Some(field) = echoed.iter().find(|f| f.name == fill.name) else {
            return Err(ClockError::ClockValidationFailed(format!(
                "field '{}' missing from submit echo",
                fill.name
            )));
        };
        if field.value != fill.value {
            return Err(ClockError::ClockValidationFailed(format!(
                "field '{}' echoed {} instead of {}",
                fill.name, field.value, fill.value
            )));
        }
    }
    Ok(())
}
