use super::types::{Agent, ErrorDetail, TaskAccepted, TaskPayload, TaskRequest, TokenResponse};
use crate::config::ClientConfig;
use crate::error::{AionError, AuthError, Result, LOGIN_FALLBACK_MESSAGE};
use crate::session::{Credential, Identity, RequestContext};
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

/// HTTP client for the platform API
#[derive(Debug, Clone)]
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base: config.base_url()?,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| AionError::Config(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Exchange username and password for a bearer token
    pub async fn request_token(&self, username: &str, password: &str) -> Result<Credential> {
        let url = self.endpoint("token")?;
        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| {
                debug!("Token request failed: {}", e);
                AionError::from(AuthError::Rejected(LOGIN_FALLBACK_MESSAGE.to_string()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorDetail>()
                .await
                .ok()
                .and_then(|d| d.message())
                .unwrap_or_else(|| LOGIN_FALLBACK_MESSAGE.to_string());
            debug!("Login rejected ({}): {}", status, message);
            return Err(AuthError::Rejected(message).into());
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AionError::Protocol(format!("Failed to parse token response: {}", e)))?;
        Ok(Credential::new(token.access_token))
    }

    /// `GET /users/me`
    pub async fn whoami(&self, ctx: &RequestContext) -> Result<Identity> {
        let url = self.endpoint("users/me")?;
        self.authorized_json(ctx, self.client.get(url)).await
    }

    /// `GET /agents`
    pub async fn list_agents(&self, ctx: &RequestContext) -> Result<Vec<Agent>> {
        let url = self.endpoint("agents")?;
        self.authorized_json(ctx, self.client.get(url)).await
    }

    /// `POST /run-task`, returning the backend-assigned task id
    pub async fn run_task(&self, ctx: &RequestContext, request: &TaskRequest) -> Result<String> {
        let url = self.endpoint("run-task")?;
        let accepted: TaskAccepted = self
            .authorized_json(ctx, self.client.post(url).json(request))
            .await?;
        Ok(accepted.task_id)
    }

    /// `GET /result/{task_id}`
    pub async fn fetch_result(&self, ctx: &RequestContext, task_id: &str) -> Result<TaskPayload> {
        let mut url = self.endpoint("result/")?;
        url.path_segments_mut()
            .map_err(|_| AionError::Config("Base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(task_id);
        self.authorized_json(ctx, self.client.get(url)).await
    }

    /// Send with the context's credential and decode a JSON success body
    async fn authorized_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = self.send_authorized(ctx, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AionError::Protocol(format!("Failed to parse response: {}", e)))
    }

    async fn send_authorized(
        &self,
        ctx: &RequestContext,
        request: RequestBuilder,
    ) -> Result<Response> {
        let grant = ctx.grant();
        let request = match &grant.credential {
            Some(credential) => request.header(AUTHORIZATION, credential.bearer()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        debug!("{} {}", status, response.url());

        if grant.credential.is_some() && !ctx.is_current(grant.epoch) {
            return Err(AuthError::SessionChanged.into());
        }

        if status == StatusCode::UNAUTHORIZED {
            if grant.credential.is_some() {
                ctx.reject(grant.epoch);
                return Err(AuthError::Expired.into());
            }
            return Err(AuthError::NotAuthenticated.into());
        }

        if !status.is_success() {
            let detail = response
                .json::<ErrorDetail>()
                .await
                .ok()
                .and_then(|d| d.message());
            return Err(AionError::Network(match detail {
                Some(detail) => format!("HTTP {}: {}", status, detail),
                None => format!("HTTP {}", status),
            }));
        }

        Ok(response)
    }
}
