// # Transport Trait
//
// Defines the single capability the engine needs from the network layer:
// issue a method + path + optional body request and hand back the decoded
// response document.
//
// ## Implementations
//
// - HTTPS: `aci-rest-http` crate
// - In-memory: `aci_rest_core::transport::MemoryTransport`
//
// ## Usage
//
// ```rust,ignore
// use aci_rest_core::traits::{Method, Transport};
//
// let response = transport
//     .request(Method::Get, "/api/mo/uni/tn-prod.json?rsp-prop-include=config-only", None)
//     .await?;
// ```

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// HTTP method used against the REST API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read an object
    Get,
    /// Create or update an object (full-object, idempotent)
    Post,
    /// Remove an object
    Delete,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for transport implementations
///
/// Authentication, TLS, proxies and connection reuse are the transport's
/// concern. The engine only sees documents and errors.
///
/// # Single-shot
///
/// A transport makes exactly one round trip per call and must NOT retry:
/// retry and backoff are owned by the lifecycle orchestrator. Return an
/// error and the orchestrator will retry according to its configured
/// policy.
///
/// # Error documents
///
/// A response that carries a structured error document (usually with a
/// 4xx status) should be returned as `Ok(document)`. The dispatcher
/// classifies error documents itself; `Err` is reserved for failures to
/// send the request or decode the response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request
    ///
    /// # Parameters
    ///
    /// - `method`: GET, POST or DELETE
    /// - `path`: path and query, e.g. "/api/mo/uni/tn-prod.json"
    /// - `body`: request document (POST only)
    ///
    /// # Returns
    ///
    /// - `Ok(Value)`: the decoded response document
    /// - `Err(Error::Transport)`: if the round trip failed
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, crate::Error>;

    /// Transport name (for logging)
    fn transport_name(&self) -> &'static str;
}
