//! Typed shapes for the portal's form-engine JSON.
//!
//! The portal is not under our control, so everything parses defensively:
//! a shape mismatch becomes a typed `Portal` error, ids accept string or
//! number, unknown form-field keys ride along untouched.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The player node owned by the student themself.
pub const OWNER_NODE: &str = "owner";

/// "Did the student fill this in personally". Stable field id; the human
/// label is bilingual and unstable.
pub const FIELD_SELF_REPORTED: &str = "select_1584240106785";
/// "Honesty commitment" field id.
pub const FIELD_INTEGRITY_PLEDGE: &str = "select_1582538939790";

pub const VALUE_YES: &str = "是";
pub const VALUE_YES_BILINGUAL: &str = "是 Yes";

/// `GET /api/app/{id}/business/now` response.
#[derive(Debug, Clone, Deserialize)]
pub struct BusinessNow {
    #[serde(default)]
    pub data: Vec<BusinessEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessEntry {
    pub business: Business,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Business {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub business_time_list: Vec<TimeNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeNode {
    pub node_id: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// `GET /api/formEngine/business/{id}/myFormInstance` response.
#[derive(Debug, Clone, Deserialize)]
pub struct FormInstanceEnvelope {
    pub data: FormInstance,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormInstance {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub form_data: Vec<FormField>,
}

/// One form field. `value` and any keys we do not know about are opaque:
/// the portal rejects partial payloads, so the whole record round-trips
/// verbatim unless it is one of the two tracked fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Submit response — the portal echoes `formData` either at the top level
/// or under `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    data: Option<SubmitEcho>,
    #[serde(default, rename = "formData")]
    form_data: Option<Vec<FormField>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitEcho {
    #[serde(default, rename = "formData")]
    form_data: Vec<FormField>,
}

impl SubmitResponse {
    pub fn echoed_fields(self) -> Option<Vec<FormField>> {
        match (self.data, self.form_data) {
            (Some(echo), _) => Some(echo.form_data),
            (None, Some(fields)) => Some(fields),
            (None, None) => None,
        }
    }
}

/// Portal ids show up as strings or bare numbers depending on the endpoint.
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {other}"
        ))),
    }
}

/// Parse one of the portal's timestamp spellings into UTC. Naive local
/// strings are interpreted in the configured portal offset.
pub fn parse_portal_time(raw: &str, utc_offset_hours: i32) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let offset = FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)?;
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive
                .and_local_timezone(offset)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}
