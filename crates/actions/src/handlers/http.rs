//! `webhook` and `api` actions plus the reqwest-backed transport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    ActionContext, ActionError, ActionHandler, ActionKind, PortError, VariableError, Variables,
    WorkflowAction,
    ports::{HttpRequest, HttpResponse, HttpTransport},
};

/// Calls out over HTTP.
///
/// `webhook` defaults to `POST` with the execution variables as body;
/// `api` defaults to `GET` with no body. Both accept `method`, `headers`,
/// `body` and `timeout` parameters.
pub struct HttpActionHandler {
    transport: Arc<dyn HttpTransport>,
}

impl HttpActionHandler {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    fn build_request(action: &WorkflowAction, ctx: &ActionContext) -> Result<HttpRequest, ActionError> {
        let params = &action.parameters;

        let url = match params.get_str("url")? {
            Some(url) => url.to_owned(),
            None => action
                .target()
                .map(str::to_owned)
                .ok_or_else(|| VariableError::Missing("url".into()))?,
        };

        let default_method = match action.kind {
            ActionKind::Webhook => "POST",
            _ => "GET",
        };
        let method = params.get_str("method")?.unwrap_or(default_method).to_uppercase();

        let mut headers = BTreeMap::new();
        if let Some(map) = params.get_object("headers")? {
            for (name, value) in map {
                let Value::String(value) = value else {
                    return Err(VariableError::TypeMismatch {
                        key: format!("headers.{name}"),
                        expected: "a string",
                        found: crate::variables::type_name(value),
                    }
                    .into());
                };
                headers.insert(name.clone(), value.clone());
            }
        }

        let body = match params.get("body") {
            Some(body) => Some(body.clone()),
            None if action.kind == ActionKind::Webhook => Some(ctx.variables.to_value()),
            None => None,
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
            timeout: params.get_duration("timeout")?,
        })
    }
}

#[async_trait]
impl ActionHandler for HttpActionHandler {
    async fn execute(&self, action: &WorkflowAction, ctx: &ActionContext) -> Result<Variables, ActionError> {
        if !matches!(action.kind, ActionKind::Webhook | ActionKind::Api) {
            return Err(ActionError::Unsupported(action.kind));
        }
        let request = Self::build_request(action, ctx)?;
        let (method, url) = (request.method.clone(), request.url.clone());

        let response = self.transport.send(request).await?;
        classify(&response).map_err(|err| {
            warn!(%method, %url, status = response.status, "http action failed");
            err
        })?;

        info!(%method, %url, status = response.status, kind = %action.kind, "http action succeeded");

        let mut out = Variables::new();
        out.insert("status_code", response.status);
        out.insert("response", response.body);
        Ok(out)
    }
}

/// 2xx succeeds; 429 and 5xx are worth retrying; anything else is final.
fn classify(response: &HttpResponse) -> Result<(), ActionError> {
    match response.status {
        200..=299 => Ok(()),
        429 | 500..=599 => Err(ActionError::Retryable(format!(
            "remote answered {}",
            response.status
        ))),
        status => Err(ActionError::Fatal(format!("remote answered {status}"))),
    }
}

// ---------------------------------------------------------------------------
// reqwest transport
// ---------------------------------------------------------------------------

/// Default per-request timeout when the action does not set one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PortError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| PortError::Rejected(format!("invalid method '{}': {e}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout.unwrap_or(DEFAULT_TIMEOUT));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                PortError::Rejected(e.to_string())
            } else {
                PortError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(HttpResponse { status, body })
    }
}
