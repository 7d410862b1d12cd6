// # HTTP Transport
//
// HTTPS transport for the ACI REST engine.
//
// ## Behaviour
//
// - One HTTP request per call; retries and backoff belong to the engine
// - HTTP timeout configured (30 seconds)
// - Password sessions: `aaaLogin` on first use, token sent as `APIC-cookie`
// - A 401/403 drops the session so the next attempt logs in again
// - Error documents are returned as bodies whatever the HTTP status; only
//   connection failures and non-JSON bodies are transport errors
//
// ## Security Requirements
//
// - Password and session token NEVER appear in logs or Debug output
//
// ## API Reference
//
// - Login: POST `/api/aaaLogin.json`
// - Managed objects: GET/POST/DELETE `/api/mo/<dn>.json`

use aci_rest_core::traits::{Method, Transport};
use aci_rest_core::{Error, RestConfig, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::RwLock;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const LOGIN_PATH: &str = "/api/aaaLogin.json";

/// HTTPS transport with a password session
pub struct HttpTransport {
    /// Controller base URL without trailing slash
    base_url: String,

    username: String,

    /// ⚠️ NEVER log this value
    password: String,

    client: reqwest::Client,

    /// Current session token, if logged in
    token: RwLock<Option<String>>,
}

// Custom Debug implementation that hides the credentials
impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport
    ///
    /// # Parameters
    ///
    /// - `base_url`: controller URL, e.g. "https://apic.example.com"
    /// - `username`/`password`: account used for `aaaLogin`
    /// - `insecure`: accept invalid TLS certificates
    /// - `proxy_url`: optional proxy for every request
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        insecure: bool,
        proxy_url: Option<&str>,
    ) -> Result<Self> {
        let password = password.into();
        if password.is_empty() {
            return Err(Error::config("password cannot be empty"));
        }

        let mut builder = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .danger_accept_invalid_certs(insecure);

        if let Some(proxy_url) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::config(format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
            client,
            token: RwLock::new(None),
        })
    }

    /// Create a transport from the engine configuration
    ///
    /// Only password sessions are supported; a configuration that relies on
    /// private_key/cert_name signatures is rejected.
    pub fn from_config(config: &RestConfig) -> Result<Self> {
        let password = config
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config("signature based sessions are not supported, set a password"))?;

        Self::new(
            config.url.clone(),
            config.username.clone(),
            password,
            config.insecure,
            config.proxy_url.as_deref(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Current token, logging in if there is none
    async fn session(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut slot = self.token.write().await;
        // Another request may have logged in meanwhile
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        let token = self.login().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// POST /api/aaaLogin.json
    async fn login(&self) -> Result<String> {
        tracing::debug!("Logging in to {} as {}", self.base_url, self.username);

        let body = json!({
            "aaaUser": { "attributes": { "name": self.username, "pwd": self.password } }
        });

        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Login request failed: {}", e)))?;

        let status = response.status();
        let json: Value = response.json().await.map_err(|e| {
            Error::transport(format!("Login returned a non-JSON body (status {}): {}", status, e))
        })?;

        let entry = json.pointer("/imdata/0");
        if let Some(error) = entry.and_then(|e| e.pointer("/error/attributes")) {
            let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
            let text = error.get("text").and_then(Value::as_str).unwrap_or_default();
            return Err(Error::rejection(code, text));
        }

        entry
            .and_then(|e| e.pointer("/aaaLogin/attributes/token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::transport(format!("Login response has no token (status {})", status)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.session().await?;

        let http_method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(http_method, self.url(path))
            .header("Cookie", format!("APIC-cookie={}", token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            tracing::warn!("Session rejected with status {}, logging in again on next request", status);
            *self.token.write().await = None;
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("Failed to read response body: {}", e)))?;

        tracing::debug!("{} {} -> {}", method, path, status);

        serde_json::from_str(&text).map_err(|_| {
            Error::transport(format!("{} {} returned a non-JSON body (status {})", method, path, status))
        })
    }

    fn transport_name(&self) -> &'static str {
        "https"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn login_ok(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "imdata": [ { "aaaLogin": { "attributes": { "token": token } } } ]
        }))
    }

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(server.uri(), "admin", "secret_password_123", true, None).unwrap()
    }

    #[tokio::test]
    async fn logs_in_once_and_reuses_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(login_ok("tok-1"))
            .expect(1)
            .mount(&server)
            .await;

        let tenant = json!({"imdata": [ { "fvTenant": { "attributes": { "name": "a" } } } ]});
        Mock::given(method("GET"))
            .and(path("/api/mo/uni/tn-a.json"))
            .and(query_param("rsp-subtree", "children"))
            .and(header("Cookie", "APIC-cookie=tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tenant.clone()))
            .expect(2)
            .mount(&server)
            .await;

        let t = transport(&server);
        for _ in 0..2 {
            let body = t
                .request(Method::Get, "/api/mo/uni/tn-a.json?rsp-subtree=children", None)
                .await
                .unwrap();
            assert_eq!(body, tenant);
        }
    }

    #[tokio::test]
    async fn error_documents_are_returned_as_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(login_ok("tok"))
            .mount(&server)
            .await;

        let rejected = json!({
            "imdata": [ { "error": { "attributes": { "code": "122", "text": "unknown property value" } } } ]
        });
        Mock::given(method("POST"))
            .and(path("/api/mo/uni/tn-a.json"))
            .respond_with(ResponseTemplate::new(400).set_body_json(rejected.clone()))
            .mount(&server)
            .await;

        let payload = json!({"fvTenant": {"attributes": {"name": "a"}}});
        let body = transport(&server)
            .request(Method::Post, "/api/mo/uni/tn-a.json", Some(&payload))
            .await
            .unwrap();

        assert_eq!(body, rejected);
    }

    #[tokio::test]
    async fn non_json_bodies_are_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(login_ok("tok"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/mo/uni/tn-a.json"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = transport(&server)
            .request(Method::Delete, "/api/mo/uni/tn-a.json", None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport(ref msg) if msg.contains("502")));
    }

    #[tokio::test]
    async fn forbidden_drops_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(login_ok("tok"))
            .expect(2)
            .mount(&server)
            .await;

        let expired = json!({
            "imdata": [ { "error": { "attributes": { "code": "403", "text": "Token was invalid" } } } ]
        });
        Mock::given(method("GET"))
            .and(path("/api/mo/uni/tn-a.json"))
            .respond_with(ResponseTemplate::new(403).set_body_json(expired))
            .mount(&server)
            .await;

        let t = transport(&server);
        t.request(Method::Get, "/api/mo/uni/tn-a.json", None).await.unwrap();
        t.request(Method::Get, "/api/mo/uni/tn-a.json", None).await.unwrap();
    }

    #[tokio::test]
    async fn failed_login_surfaces_the_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "imdata": [ { "error": { "attributes": { "code": "401", "text": "Username or password is incorrect" } } } ]
            })))
            .mount(&server)
            .await;

        let err = transport(&server)
            .request(Method::Get, "/api/mo/uni/tn-a.json", None)
            .await
            .unwrap_err();

        assert_eq!(err.remote_code(), Some("401"));
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_transport_error() {
        let t = HttpTransport::new("http://127.0.0.1:1", "admin", "pw", true, None).unwrap();
        let err = t.request(Method::Get, "/api/mo/uni.json", None).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn from_config_requires_a_password() {
        let mut config = RestConfig::new("https://apic", "admin");
        config.private_key = Some("/keys/admin.key".to_string());
        config.cert_name = Some("admin".to_string());
        assert!(matches!(HttpTransport::from_config(&config), Err(Error::Config(_))));

        let config = config.with_password("pw");
        assert!(HttpTransport::from_config(&config).is_ok());
    }

    #[test]
    fn credentials_not_exposed_in_debug() {
        let t = HttpTransport::new("https://apic/", "admin", "secret_password_123", false, None).unwrap();

        let debug_str = format!("{:?}", t);
        assert!(!debug_str.contains("secret_password"));
        assert!(debug_str.contains("https://apic\""));
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let result = HttpTransport::new("https://apic", "admin", "pw", false, Some("not a url"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
