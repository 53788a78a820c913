//! OpenWhisk REST access to activation logs and results.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::ActivationLogSource;
use crate::config::RuntimeCredentials;
use crate::error::{DevToolError, Result};

#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default)]
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    #[serde(default)]
    result: Value,
}

/// Activation log source for one runtime namespace
pub struct OpenWhiskLogs {
    apihost: String,
    namespace: String,
    user: String,
    password: Option<String>,
    client: reqwest::Client,
}

impl OpenWhiskLogs {
    pub fn new(credentials: &RuntimeCredentials) -> Self {
        let apihost = if credentials.apihost.starts_with("http") {
            credentials.apihost.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", credentials.apihost.trim_end_matches('/'))
        };

        // Runtime auth keys are `user:password`
        let (user, password) = match credentials.auth.split_once(':') {
            Some((user, password)) => (user.to_string(), Some(password.to_string())),
            None => (credentials.auth.clone(), None),
        };

        Self {
            apihost,
            namespace: credentials.namespace.clone(),
            user,
            password,
            client: reqwest::Client::new(),
        }
    }

    pub fn activation_url(&self, activation_id: &str, resource: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/activations/{}/{}",
            self.apihost, self.namespace, activation_id, resource
        )
    }

    async fn get(&self, activation_id: &str, resource: &str) -> Result<reqwest::Response> {
        let url = self.activation_url(activation_id, resource);
        debug!(%url, "Fetching activation {}", resource);

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.user, self.password.as_ref())
            .send()
            .await
            .map_err(|e| DevToolError::LogFetch {
                activation_id: activation_id.to_string(),
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DevToolError::LogFetch {
                activation_id: activation_id.to_string(),
                status: Some(status.as_u16()),
                message: error_message(&text),
            });
        }
        Ok(response)
    }
}

/// The `error` field of an OpenWhisk error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Child activation ids listed in an activation result
pub fn child_ids(result: &Value) -> Vec<String> {
    result
        .get("activationIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ActivationLogSource for OpenWhiskLogs {
    async fn activation_logs(&self, activation_id: &str) -> Result<Vec<String>> {
        let response = self.get(activation_id, "logs").await?;
        let body: LogsResponse = response.json().await.map_err(|e| DevToolError::LogFetch {
            activation_id: activation_id.to_string(),
            status: None,
            message: e.to_string(),
        })?;
        Ok(body.logs)
    }

    async fn child_activation_ids(&self, activation_id: &str) -> Result<Vec<String>> {
        let response = self.get(activation_id, "result").await?;
        let body: ResultResponse = response.json().await.map_err(|e| DevToolError::LogFetch {
            activation_id: activation_id.to_string(),
            status: None,
            message: e.to_string(),
        })?;
        Ok(child_ids(&body.result))
    }
}
