//! Authenticated HTTP client for the Vitrine backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{TimeDelta, Utc};
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::session::AuthSession;
use super::{ApiError, extract_message};
use crate::config::StorefrontConfig;

/// Token refresh endpoint.
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Refresh ahead of time when the access token expires this soon.
const REFRESH_MARGIN_SECS: i64 = 30;

// =============================================================================
// ApiRequest
// =============================================================================

/// A request to the backend, replayable after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
    authenticated: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            authenticated: true,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body. The body is serialized once so replays send the
    /// same bytes.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Parse` if the body cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Send without credentials and skip the refresh interceptor.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.authenticated = false;
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the Vitrine backend API.
///
/// Attaches the session's bearer token to every authenticated request. On a
/// `401` the session is refreshed once (shared by all requests that failed
/// concurrently) and the request is replayed once.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
    session: RwLock<Option<AuthSession>>,
    /// Held while a refresh is in flight.
    refresh_lock: Mutex<()>,
    /// Bumped on every session change, under the session write lock.
    generation: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access")]
    access_token: String,
    #[serde(default, alias = "refresh")]
    refresh_token: Option<String>,
}

impl ApiClient {
    /// Create a client for the configured backend, seeding the session from
    /// configured tokens.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &StorefrontConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let session = config
            .access_token
            .clone()
            .map(|access| AuthSession::new(access, config.refresh_token.clone()));
        Ok(Self::with_client(client, config.api_url.clone(), session))
    }

    /// Create a client around an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: Url, session: Option<AuthSession>) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url,
                session: RwLock::new(session),
                refresh_lock: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The current session, if signed in.
    pub async fn session(&self) -> Option<AuthSession> {
        self.inner.session.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.session.read().await.is_some()
    }

    /// Replace the session (after sign-in).
    pub async fn set_session(&self, session: AuthSession) {
        self.replace_session(Some(session)).await;
    }

    /// Drop the session (sign-out, or refresh failure).
    pub async fn clear_session(&self) {
        self.replace_session(None).await;
    }

    async fn replace_session(&self, session: Option<AuthSession>) {
        let mut guard = self.inner.session.write().await;
        *guard = session;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }

    async fn current_token(&self) -> (Option<SecretString>, u64) {
        let guard = self.inner.session.read().await;
        (
            guard.as_ref().map(|s| s.access_token().clone()),
            self.inner.generation.load(Ordering::Acquire),
        )
    }

    /// Resolve a request path against the base URL, keeping any path prefix
    /// the base URL carries.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidUrl` if the result is not a valid URL.
    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let base = &self.inner.base_url;
        let joined = format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(base.join(&joined)?)
    }

    fn request_url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = self.url(&request.path)?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    // -------------------------------------------------------------------------
    // Convenience methods
    // -------------------------------------------------------------------------

    /// `GET` a JSON resource.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body cannot be parsed.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    /// `POST` a JSON body and parse the JSON response.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body cannot be parsed.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    /// `PUT` a JSON body and parse the JSON response.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body cannot be parsed.
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await
    }

    /// `DELETE` a resource, ignoring the response body.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::delete(path)).await
    }

    /// Send a request and parse the JSON response.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body cannot be parsed.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let text = self.execute(&request).await?;
        parse_body(&text)
    }

    /// Send a request, discarding the response body.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails.
    pub async fn send_empty(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.execute(&request).await.map(|_| ())
    }

    // -------------------------------------------------------------------------
    // Execution and refresh
    // -------------------------------------------------------------------------

    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn execute(&self, request: &ApiRequest) -> Result<String, ApiError> {
        if !request.authenticated {
            let response = self.dispatch(request, None).await?;
            return handle_response(response).await;
        }

        self.refresh_if_expiring().await;

        let (token, generation) = self.current_token().await;
        let response = self.dispatch(request, token.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return handle_response(response).await;
        }
        if token.is_none() {
            return Err(ApiError::SessionExpired);
        }

        debug!("access token rejected, refreshing session");
        self.refresh(generation).await?;

        let (token, _) = self.current_token().await;
        let response = self.dispatch(request, token.as_ref()).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("request still unauthorized after refresh");
            self.clear_session().await;
            return Err(ApiError::SessionExpired);
        }
        handle_response(response).await
    }

    async fn refresh_if_expiring(&self) {
        let expiring = {
            let guard = self.inner.session.read().await;
            guard.as_ref().is_some_and(|s| {
                s.refresh_token().is_some()
                    && s.expires_within(TimeDelta::seconds(REFRESH_MARGIN_SECS), Utc::now())
            })
        };
        if !expiring {
            return;
        }
        let (_, generation) = self.current_token().await;
        if let Err(e) = self.refresh(generation).await {
            debug!(error = %e, "proactive token refresh failed");
        }
    }

    /// Refresh the session unless another caller already did so since
    /// `seen_generation` was read.
    async fn refresh(&self, seen_generation: u64) -> Result<(), ApiError> {
        let _guard = self.inner.refresh_lock.lock().await;

        if self.inner.generation.load(Ordering::Acquire) != seen_generation {
            return if self.is_authenticated().await {
                Ok(())
            } else {
                Err(ApiError::SessionExpired)
            };
        }

        let refresh_token = self
            .inner
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.refresh_token().cloned());
        let Some(refresh_token) = refresh_token else {
            self.clear_session().await;
            return Err(ApiError::SessionExpired);
        };

        match self.request_refresh(&refresh_token).await {
            Ok(session) => {
                self.set_session(session.or_refresh_token(Some(&refresh_token)))
                    .await;
                info!("session refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, clearing session");
                self.clear_session().await;
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &SecretString) -> Result<AuthSession, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .public()
            .json(&serde_json::json!({ "refresh_token": refresh_token.expose_secret() }))?;
        let response = self.dispatch(&request, None).await?;
        let text = handle_response(response).await?;
        let body: RefreshResponse = parse_body(&text)?;
        Ok(AuthSession::new(
            SecretString::from(body.access_token),
            body.refresh_token.map(SecretString::from),
        ))
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&SecretString>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.request_url(request)?;
        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json");
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }
}

/// Map a response to its body text, or to an `ApiError`.
async fn handle_response(response: reqwest::Response) -> Result<String, ApiError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(ApiError::RateLimited(retry_after));
    }

    let text = response.text().await?;

    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(extract_message(&text)));
    }

    if !status.is_success() {
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                body = %text.chars().take(500).collect::<String>(),
                "Backend returned server error"
            );
        } else {
            debug!(status = %status, "Backend rejected request");
        }
        return Err(ApiError::Api {
            status: status.as_u16(),
            message: extract_message(&text),
        });
    }

    Ok(text)
}

/// Parse a JSON body; an empty body parses as `null`.
fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| {
        tracing::error!(
            error = %e,
            body = %text.chars().take(500).collect::<String>(),
            "Failed to parse backend response"
        );
        ApiError::Parse(e)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap(), None)
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let api = client("https://api.vitrine.test/");
        assert_eq!(
            api.url("/api/orders/user/orders").unwrap().as_str(),
            "https://api.vitrine.test/api/orders/user/orders"
        );
    }

    #[test]
    fn test_url_keeps_base_path_prefix() {
        let api = client("https://vitrine.test/backend");
        assert_eq!(
            api.url("api/coupons/validate").unwrap().as_str(),
            "https://vitrine.test/backend/api/coupons/validate"
        );
    }

    #[test]
    fn test_request_query_is_encoded() {
        let api = client("https://vitrine.test");
        let request = ApiRequest::get("/api/search").query("q", "vestido midi & cia");
        assert_eq!(
            api.request_url(&request).unwrap().as_str(),
            "https://vitrine.test/api/search?q=vestido+midi+%26+cia"
        );
    }

    #[test]
    fn test_request_builder_flags() {
        let request = ApiRequest::post("/api/payments/process")
            .header("X-Idempotency-Key", "abc")
            .json(&serde_json::json!({"order_id": 1}))
            .unwrap();
        assert!(request.authenticated);
        assert!(request.body.is_some());
        assert_eq!(request.headers, vec![("X-Idempotency-Key", "abc".to_string())]);
        assert!(!ApiRequest::get("/x").public().authenticated);
    }

    #[test]
    fn test_parse_body_empty_is_null() {
        let value: Option<serde_json::Value> = parse_body("  ").unwrap();
        assert!(value.is_none());
        parse_body::<()>("").unwrap();
    }

    #[tokio::test]
    async fn test_session_changes_bump_generation() {
        let api = client("https://vitrine.test");
        let (_, before) = api.current_token().await;
        api.set_session(AuthSession::new(SecretString::from("token"), None))
            .await;
        let (token, after) = api.current_token().await;
        assert!(token.is_some());
        assert!(after > before);
        api.clear_session().await;
        assert!(!api.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_expires_session() {
        let api = client("https://vitrine.test");
        api.set_session(AuthSession::new(SecretString::from("token"), None))
            .await;
        let (_, generation) = api.current_token().await;
        let err = api.refresh(generation).await.unwrap_err();
        assert!(matches!(err, ApiError::SessionExpired));
        assert!(!api.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_stale_refresh_reuses_newer_session() {
        let api = client("https://vitrine.test");
        let (_, stale) = api.current_token().await;
        api.set_session(AuthSession::new(SecretString::from("fresh"), None))
            .await;
        // Another caller already refreshed: no network call, no error.
        api.refresh(stale).await.unwrap();
        assert!(api.is_authenticated().await);
    }
}
