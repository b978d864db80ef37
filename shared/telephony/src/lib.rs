//! Call Dispatcher (C6), spec §4.6.
//!
//! Mirrors the teacher pack's Twilio REST client shape (a form-encoded
//! `calls.create` request) but exposes it behind a trait so `services/api`
//! and `services/scheduler` can share one dispatch path and tests can swap
//! in a fake provider.

use std::collections::HashMap;

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct CreateCallParams {
    pub to: String,
    pub from: String,
    pub url: String,
    pub status_callback: String,
    /// Hard ceiling in seconds; spec §4.6/§9: `duration_cap + 5s`.
    pub time_limit_sec: u32,
    pub record: bool,
}

#[derive(Debug, Clone)]
pub struct DispatchedCall {
    pub provider_call_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("telephony provider request failed: {0}")]
    Transport(String),
    #[error("telephony provider rejected the call: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait TelephonyClient: Send + Sync {
    async fn create_call(&self, params: CreateCallParams) -> Result<DispatchedCall, DispatchError>;
}

/// Production client against the provider's `Calls` REST resource
/// (`to`, `from`, `url`, `status_callback`, `time_limit`, `record`,
/// `machine_detection=disabled` per spec §4.6 step 4).
pub struct ProviderTelephonyClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl ProviderTelephonyClient {
    pub fn new(api_base: String, account_sid: String, auth_token: String) -> Self {
        ProviderTelephonyClient {
            http: reqwest::Client::new(),
            api_base,
            account_sid,
            auth_token,
        }
    }
}

#[derive(serde::Deserialize)]
struct CreateCallResponse {
    sid: String,
}

#[async_trait]
impl TelephonyClient for ProviderTelephonyClient {
    async fn create_call(&self, params: CreateCallParams) -> Result<DispatchedCall, DispatchError> {
        let mut form: HashMap<&str, String> = HashMap::new();
        form.insert("To", params.to);
        form.insert("From", params.from);
        form.insert("Url", params.url);
        form.insert("StatusCallback", params.status_callback);
        form.insert("TimeLimit", params.time_limit_sec.to_string());
        form.insert("Record", params.record.to_string());
        form.insert("MachineDetection", "disabled".to_string());

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        );

        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!("{status}: {body}")));
        }

        let parsed: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(DispatchedCall {
            provider_call_id: parsed.sid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeClient {
        calls: Mutex<Vec<CreateCallParams>>,
        outcome: Result<DispatchedCall, &'static str>,
    }

    #[async_trait]
    impl TelephonyClient for FakeClient {
        async fn create_call(
            &self,
            params: CreateCallParams,
        ) -> Result<DispatchedCall, DispatchError> {
            self.calls.lock().unwrap().push(params);
            match &self.outcome {
                Ok(call) => Ok(call.clone()),
                Err(msg) => Err(DispatchError::Rejected(msg.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn successful_dispatch_returns_provider_call_id() {
        let client = FakeClient {
            calls: Mutex::new(vec![]),
            outcome: Ok(DispatchedCall {
                provider_call_id: "CA1".into(),
            }),
        };
        let result = client
            .create_call(CreateCallParams {
                to: "+15551234567".into(),
                from: "+15557654321".into(),
                url: "https://example.com/incoming-call/default".into(),
                status_callback: "https://example.com/call-end-webhook".into(),
                time_limit_sec: 65,
                record: true,
            })
            .await
            .unwrap();
        assert_eq!(result.provider_call_id, "CA1");
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_dispatch_surfaces_as_error() {
        let client = FakeClient {
            calls: Mutex::new(vec![]),
            outcome: Err("insufficient funds"),
        };
        let err = client
            .create_call(CreateCallParams {
                to: "+15551234567".into(),
                from: "+15557654321".into(),
                url: "https://example.com/incoming-call/default".into(),
                status_callback: "https://example.com/call-end-webhook".into(),
                time_limit_sec: 65,
                record: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(_)));
    }
}
