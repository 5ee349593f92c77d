//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (initial OAuth flow completion)
//! 2. Token refresh (on demand, when a credential is about to expire)
//!
//! Both operations POST a `multipart/form-data` body to the token endpoint
//! with different grant types. Neither is retried here: an authorization
//! code is single-use, and refresh retries are the caller's decision.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::credentials::{Credential, now_millis};
use crate::error::{Error, Result};
use crate::multipart::MultipartForm;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Token endpoint response to an authorization code exchange.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize)]
pub struct ExchangeResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
    pub account_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub refresh_token: String,
}

impl ExchangeResponse {
    /// Build a detached credential, anchoring expiry to the current time.
    pub fn into_credential(self) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: expires_at(self.expires_in),
            scope: self.scope,
            account_id: self.account_id,
            team_id: self.team_id,
        }
    }
}

/// Token endpoint response to a refresh exchange.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: u64,
    /// Only present if the provider rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    /// Produce the refreshed copy of `credential`.
    ///
    /// Access token and expiry are replaced; everything else is copied. A
    /// rotated refresh token is adopted when the provider sends one.
    pub fn apply_to(self, credential: &Credential) -> Credential {
        let mut refreshed = credential.clone();
        refreshed.access_token = self.access_token;
        refreshed.expires_at = expires_at(self.expires_in);
        if let Some(rotated) = self.refresh_token.filter(|t| !t.is_empty()) {
            if rotated != credential.refresh_token {
                info!(account_id = %credential.account_id, "provider rotated the refresh token");
                refreshed.refresh_token = rotated;
            }
        }
        refreshed
    }
}

/// Provider error payload. `error` is usually a code string; Dropbox API
/// style errors carry an object there and a `code/...` summary instead.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    error_summary: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl ErrorPayload {
    fn code(&self) -> Option<&str> {
        if let Some(serde_json::Value::String(code)) = &self.error {
            return Some(code.as_str());
        }
        self.error_summary
            .as_deref()
            .and_then(|summary| summary.split('/').next())
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

fn expires_at(expires_in_secs: u64) -> u64 {
    now_millis().saturating_add(expires_in_secs.saturating_mul(1000))
}

/// Client for the provider's token endpoint, bound to one app key.
#[derive(Clone)]
pub struct TokenClient {
    client_id: String,
    endpoint: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("client_id", &self.client_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    pub fn new(
        client_id: impl Into<String>,
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint: endpoint.into(),
            transport,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Exchange an authorization code for a credential.
    ///
    /// The user has authorized in the browser and the callback delivered
    /// `code`. The PKCE verifier proves this client started the flow.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<Credential> {
        let form = exchange_form(&self.client_id, code, verifier, redirect_uri);
        let response = self.post(form).await?;
        let decoded: ExchangeResponse = decode_response(&response)?;
        let credential = decoded.into_credential();
        info!(account_id = %credential.account_id, "authorization code exchanged");
        Ok(credential)
    }

    /// Refresh the access token of `credential`.
    ///
    /// Returns a new value; `credential` itself is left untouched.
    pub async fn refresh_token(&self, credential: &Credential) -> Result<Credential> {
        let form = refresh_form(&self.client_id, &credential.refresh_token);
        let response = self.post(form).await?;
        let decoded: RefreshResponse = decode_response(&response)?;
        let refreshed = decoded.apply_to(credential);
        debug!(account_id = %refreshed.account_id, "access token refreshed");
        Ok(refreshed)
    }

    async fn post(&self, form: MultipartForm) -> Result<HttpResponse> {
        let request = HttpRequest {
            url: self.endpoint.clone(),
            content_type: form.content_type(),
            body: form.encode(),
        };
        self.transport.send(request).await
    }
}

/// Form fields for the authorization code exchange.
pub fn exchange_form(
    client_id: &str,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> MultipartForm {
    MultipartForm::new()
        .field("code", code)
        .field("code_verifier", verifier)
        .field("redirect_uri", redirect_uri)
        .field("client_id", client_id)
        .field("grant_type", "authorization_code")
}

/// Form fields for the refresh exchange.
pub fn refresh_form(client_id: &str, refresh_token: &str) -> MultipartForm {
    MultipartForm::new()
        .field("refresh_token", refresh_token)
        .field("client_id", client_id)
        .field("grant_type", "refresh_token")
}

/// Decode a token endpoint response.
///
/// A success body that decodes as `T` wins. Otherwise the body is tried as
/// a provider error payload, and if that also fails the original decode
/// problem is reported.
fn decode_response<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    let original = if response.is_success() {
        match serde_json::from_slice::<T>(&response.body) {
            Ok(decoded) => return Ok(decoded),
            Err(e) => Error::Decode(format!("invalid token response: {e}")),
        }
    } else {
        Error::Decode(format!(
            "token endpoint returned {}: {}",
            response.status,
            response.body_text()
        ))
    };

    match provider_error(response) {
        Some(err) => Err(err),
        None => Err(original),
    }
}

fn provider_error(response: &HttpResponse) -> Option<Error> {
    let payload: ErrorPayload = serde_json::from_slice(&response.body).ok()?;
    let code = payload.code()?;
    warn!(
        status = response.status,
        code,
        description = payload.error_description.as_deref().unwrap_or(""),
        "token endpoint reported an error"
    );
    Some(Error::oauth(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OAuthErrorCode;
    use std::sync::Mutex;

    /// Transport returning canned responses and recording requests.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<HttpResponse>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn json(status: u16, body: &str) -> Arc<Self> {
            Self::new(vec![Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            })])
        }

        fn last_request(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> TokenClient {
        TokenClient::new("key1", "https://api.dropbox.com/oauth2/token", transport)
    }

    fn sample_credential() -> Credential {
        Credential {
            access_token: "at_old".into(),
            refresh_token: "rt_1".into(),
            expires_at: 1,
            scope: Some("files.content.read".into()),
            account_id: "dbid:abc".into(),
            team_id: Some("team-1".into()),
        }
    }

    const EXCHANGE_BODY: &str = r#"{
        "access_token": "sl.at",
        "expires_in": 14400,
        "token_type": "bearer",
        "scope": "account_info.read",
        "account_id": "dbid:abc",
        "team_id": "dbtid:t",
        "refresh_token": "rt_new",
        "uid": "12345"
    }"#;

    #[test]
    fn exchange_form_wire_shape() {
        let form = exchange_form("key1", "abc", "xyz", "app://cb");
        let boundary = form.boundary().to_string();
        let body = String::from_utf8(form.encode()).unwrap();

        let expected_parts = [
            ("code", "abc"),
            ("code_verifier", "xyz"),
            ("redirect_uri", "app://cb"),
            ("client_id", "key1"),
            ("grant_type", "authorization_code"),
        ];
        let mut expected = String::new();
        for (name, value) in expected_parts {
            expected.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        expected.push_str(&format!("--{boundary}--\r\n"));

        assert_eq!(body, expected);
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn refresh_form_wire_shape() {
        let form = refresh_form("key1", "rt_1");
        let body = String::from_utf8(form.encode()).unwrap();
        assert!(body.contains("name=\"refresh_token\"\r\n\r\nrt_1\r\n"));
        assert!(body.contains("name=\"client_id\"\r\n\r\nkey1\r\n"));
        assert!(body.contains("name=\"grant_type\"\r\n\r\nrefresh_token\r\n"));
        assert!(!body.contains("code_verifier"));
    }

    #[tokio::test]
    async fn exchange_decodes_credential() {
        let transport = ScriptedTransport::json(200, EXCHANGE_BODY);
        let before = now_millis();
        let credential = client(transport.clone())
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap();

        assert_eq!(credential.access_token, "sl.at");
        assert_eq!(credential.refresh_token, "rt_new");
        assert_eq!(credential.account_id, "dbid:abc");
        assert_eq!(credential.team_id.as_deref(), Some("dbtid:t"));
        assert_eq!(credential.scope.as_deref(), Some("account_info.read"));
        assert!(credential.expires_at >= before + 14_400_000);
        assert!(credential.expires_at <= now_millis() + 14_400_000);

        let request = transport.last_request();
        assert_eq!(request.url, "https://api.dropbox.com/oauth2/token");
        assert!(request.content_type.starts_with("multipart/form-data; charset=utf-8; boundary="));
        let boundary = request.content_type.rsplit("boundary=").next().unwrap();
        let body = String::from_utf8(request.body).unwrap();
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[tokio::test]
    async fn exchange_tolerates_missing_scope_and_team() {
        let body = r#"{"access_token":"at","expires_in":60,"account_id":"a","refresh_token":"rt"}"#;
        let credential = client(ScriptedTransport::json(200, body))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap();
        assert!(credential.scope.is_none());
        assert!(credential.team_id.is_none());
    }

    #[tokio::test]
    async fn error_status_maps_provider_code() {
        let body = r#"{"error":"temporarily_unavailable","error_description":"try later"}"#;
        let err = client(ScriptedTransport::json(503, body))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OAuth(OAuthErrorCode::TemporarilyUnavailable)
        ));
    }

    #[tokio::test]
    async fn unrecognized_provider_code_is_unknown() {
        let body = r#"{"error":"invalid_grant","error_description":"code doesn't exist"}"#;
        let err = client(ScriptedTransport::json(400, body))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OAuth(OAuthErrorCode::Unknown)));
    }

    #[tokio::test]
    async fn error_summary_is_used_when_error_is_an_object() {
        let body = r#"{"error_summary":"server_error/..","error":{".tag":"server_error"}}"#;
        let err = client(ScriptedTransport::json(500, body))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OAuth(OAuthErrorCode::ServerError)));
    }

    #[tokio::test]
    async fn error_payload_in_success_body_is_reported() {
        let body = r#"{"error":"access_denied"}"#;
        let err = client(ScriptedTransport::json(200, body))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OAuth(OAuthErrorCode::AccessDenied)));
    }

    #[tokio::test]
    async fn undecodable_success_body_is_decode_error() {
        let err = client(ScriptedTransport::json(200, "<html>oops</html>"))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn undecodable_error_body_is_decode_error_with_status() {
        let err = client(ScriptedTransport::json(502, "bad gateway"))
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        match err {
            Error::Decode(msg) => assert!(msg.contains("502"), "got: {msg}"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_surfaces_unchanged() {
        let transport =
            ScriptedTransport::new(vec![Err(Error::Transport("connection refused".into()))]);
        let err = client(transport)
            .exchange_code("abc", "xyz", "app://cb")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn refresh_replaces_only_access_token_and_expiry() {
        let transport = ScriptedTransport::json(200, r#"{"access_token":"at_new","expires_in":14400}"#);
        let original = sample_credential();
        let refreshed = client(transport.clone())
            .refresh_token(&original)
            .await
            .unwrap();

        assert_eq!(refreshed.access_token, "at_new");
        assert!(refreshed.expires_at > original.expires_at);
        assert_eq!(refreshed.refresh_token, original.refresh_token);
        assert_eq!(refreshed.account_id, original.account_id);
        assert_eq!(refreshed.scope, original.scope);
        assert_eq!(refreshed.team_id, original.team_id);

        let body = String::from_utf8(transport.last_request().body).unwrap();
        assert!(body.contains("name=\"grant_type\"\r\n\r\nrefresh_token\r\n"));
    }

    #[tokio::test]
    async fn refresh_adopts_rotated_refresh_token() {
        let transport = ScriptedTransport::json(
            200,
            r#"{"access_token":"at_new","expires_in":14400,"refresh_token":"rt_rotated"}"#,
        );
        let refreshed = client(transport)
            .refresh_token(&sample_credential())
            .await
            .unwrap();
        assert_eq!(refreshed.refresh_token, "rt_rotated");
    }

    #[tokio::test]
    async fn refresh_rejection_is_typed() {
        let transport = ScriptedTransport::json(400, r#"{"error":"unauthorized_client"}"#);
        let err = client(transport)
            .refresh_token(&sample_credential())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OAuth(OAuthErrorCode::UnauthorizedClient)));
    }
}
