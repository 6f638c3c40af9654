//! REST client for the email server backend

use crate::session::SessionUser;
use maildcn_common::config::BackendConfig;
use maildcn_common::{Error, Result};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInResponse {
    pub token: String,
    pub user: SessionUser,
}

/// `{"status": ..., "message": ...}` acknowledgement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusMessage {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailList {
    #[serde(default)]
    pub emails: Vec<Value>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogList {
    #[serde(default)]
    pub logs: Vec<Value>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemMetrics {
    #[serde(default)]
    pub total_emails: u64,
    #[serde(default)]
    pub spam_detected: u64,
    #[serde(default)]
    pub encryption_rate: String,
    #[serde(default)]
    pub tls_connections: u64,
    #[serde(default)]
    pub security_score: f64,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestEmailRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    pub subject: String,
    pub content: String,
}

/// Message to run through the spam, keyword and phishing analysis
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisRequest {
    pub content: String,
    pub subject: String,
    pub sender: String,
}

/// Draft to get suggestions for
#[derive(Debug, Clone, Serialize)]
pub struct CompositionRequest {
    pub content: String,
    pub context: String,
    pub tone: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyRequest {
    pub original_email: String,
    pub context: String,
    pub tone: String,
}

/// Backend HTTP client; requests are never retried
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl ApiClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        })
    }

    /// Same client, authenticating with `token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request
    }

    fn require_token(&self) -> Result<()> {
        match &self.token {
            Some(_) => Ok(()),
            None => Err(Error::Auth("not signed in".to_string())),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} request failed: {}", what, e)))?;

        let response = check_status(response, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Protocol(format!("unexpected {} response: {}", what, e)))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignInResponse> {
        let request = self
            .build_request(Method::POST, "/api/auth/signin")
            .json(&Credentials { email, password });
        self.send(request, "sign in").await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<StatusMessage> {
        let request = self
            .build_request(Method::POST, "/api/auth/signup")
            .json(&Credentials { email, password });
        self.send(request, "sign up").await
    }

    pub async fn list_emails(&self) -> Result<EmailList> {
        self.require_token()?;
        self.send(self.build_request(Method::GET, "/api/emails"), "emails")
            .await
    }

    pub async fn email_history(&self) -> Result<EmailList> {
        self.require_token()?;
        self.send(
            self.build_request(Method::GET, "/api/emails/history"),
            "email history",
        )
        .await
    }

    pub async fn send_test_email(&self, email: &TestEmailRequest) -> Result<Value> {
        self.require_token()?;
        let request = self
            .build_request(Method::POST, "/api/send-test-email")
            .json(email);
        self.send(request, "test email").await
    }

    /// Full analysis report of one stored email
    pub async fn email_report(&self, id: &str) -> Result<Value> {
        self.require_token()?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation(format!("invalid email id '{}'", id)));
        }
        self.send(
            self.build_request(Method::GET, &format!("/api/email/{}/report", id)),
            "email report",
        )
        .await
    }

    pub async fn comprehensive_analysis(&self, request: &AnalysisRequest) -> Result<Value> {
        self.require_token()?;
        let request = self
            .build_request(Method::POST, "/api/ai/comprehensive-analysis")
            .json(request);
        self.send(request, "analysis").await
    }

    pub async fn composition_help(&self, request: &CompositionRequest) -> Result<Value> {
        self.require_token()?;
        let request = self
            .build_request(Method::POST, "/api/ai/composition-help")
            .json(request);
        self.send(request, "composition help").await
    }

    pub async fn generate_reply(&self, request: &ReplyRequest) -> Result<Value> {
        self.require_token()?;
        let request = self
            .build_request(Method::POST, "/api/ai/generate-reply")
            .json(request);
        self.send(request, "reply").await
    }

    pub async fn start_servers(&self) -> Result<StatusMessage> {
        self.send(
            self.build_request(Method::POST, "/api/servers/start"),
            "start servers",
        )
        .await
    }

    pub async fn stop_servers(&self) -> Result<StatusMessage> {
        self.send(
            self.build_request(Method::POST, "/api/servers/stop"),
            "stop servers",
        )
        .await
    }

    pub async fn metrics(&self) -> Result<SystemMetrics> {
        self.send(self.build_request(Method::GET, "/api/metrics"), "metrics")
            .await
    }

    pub async fn logs(&self, limit: Option<u32>) -> Result<LogList> {
        let mut request = self.build_request(Method::GET, "/api/logs");
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.send(request, "logs").await
    }

    pub async fn clear_logs(&self) -> Result<StatusMessage> {
        self.send(
            self.build_request(Method::POST, "/api/logs/clear"),
            "clear logs",
        )
        .await
    }
}

/// Map a non-success status to an error carrying the backend's message
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        debug!("{} -> {}", what, status);
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_else(|e| {
        warn!("Failed to read {} error body: {}", what, e);
        String::new()
    });
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    warn!("{} failed: status={} message={}", what, status, message);

    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Auth(message));
    }
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

/// `error` or `message` field of a JSON error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
