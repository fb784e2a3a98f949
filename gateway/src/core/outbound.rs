//! Outbound call dispatch over the carrier's REST API, plus the in-memory
//! registry of call records behind `GET /calls`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Duration;

use crate::core::session::validate_e164;
use crate::errors::app_error::{AppError, AppResult};

/// Carrier REST call timeout.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle events a status callback subscribes to.
pub const STATUS_CALLBACK_EVENTS: &[&str] =
    &["initiated", "ringing", "answered", "completed"];

/// Parameters for placing an outbound call.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceCallRequest {
    /// Destination, E.164.
    pub to: String,
    /// Caller id; defaults to the configured carrier number.
    #[serde(default)]
    pub from: Option<String>,
    /// Record the call (dual-channel).
    #[serde(default)]
    pub record: bool,
    /// Status-callback URL, subscribed to the lifecycle events.
    #[serde(default)]
    pub status_callback: Option<String>,
}

/// A call known to this process.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_sid: String,
    pub to: String,
    pub from: String,
    pub direction: CallDirection,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// In-memory registry of calls this process has seen. Serves the call
/// listing; it is not durable and does not try to be.
#[derive(Clone, Default)]
pub struct CallRegistry {
    inner: Arc<RwLock<HashMap<String, CallRecord>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: CallRecord) {
        let mut map = self.inner.write().expect("call registry poisoned");
        map.insert(record.call_sid.clone(), record);
    }

    pub fn set_status(&self, call_sid: &str, status: &str) {
        let mut map = self.inner.write().expect("call registry poisoned");
        if let Some(record) = map.get_mut(call_sid) {
            record.status = status.to_string();
        }
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<CallRecord> {
        let map = self.inner.read().expect("call registry poisoned");
        let mut records: Vec<CallRecord> = map.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

/// Thin wrapper over the carrier's REST API.
#[derive(Clone)]
pub struct CallDispatcher {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl CallDispatcher {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Place an outbound call whose behavior is governed by the control
    /// document at `document_url`. Returns the carrier call sid.
    pub async fn place(
        &self,
        request: &PlaceCallRequest,
        from: &str,
        document_url: &str,
    ) -> AppResult<String> {
        validate_e164(&request.to).map_err(AppError::Validation)?;
        validate_e164(from).map_err(AppError::Validation)?;

        let mut form: Vec<(String, String)> = vec![
            ("To".into(), request.to.clone()),
            ("From".into(), from.to_string()),
            ("Url".into(), document_url.to_string()),
            ("Method".into(), "POST".into()),
        ];

        if request.record {
            form.push(("Record".into(), "true".into()));
            form.push(("RecordingChannels".into(), "dual".into()));
        }

        if let Some(callback) = &request.status_callback {
            form.push(("StatusCallback".into(), callback.clone()));
            form.push(("StatusCallbackMethod".into(), "POST".into()));
            for event in STATUS_CALLBACK_EVENTS {
                form.push(("StatusCallbackEvent".into(), (*event).into()));
            }
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(DISPATCH_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            tracing::error!(status = %status, ?body, "carrier rejected outbound call");
            return Err(AppError::Carrier {
                status: status.as_u16(),
                body,
            });
        }

        let call_sid = body
            .get("sid")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("carrier response missing sid")))?
            .to_string();

        tracing::info!(call_sid = %call_sid, to = %request.to, "outbound call initiated");
        Ok(call_sid)
    }
}
