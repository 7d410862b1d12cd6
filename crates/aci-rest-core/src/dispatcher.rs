//! Remote operation dispatcher
//!
//! Issues exactly one request per call and classifies the result. Retrying
//! is the orchestrator's job, not the dispatcher's.
//!
//! ## Classification
//!
//! 1. Transport failure → `Err(Error::Transport)`
//! 2. Empty `imdata` (or `[{}]`) → [`Outcome::Absent`]
//! 3. Error document:
//!    - DELETE with an "already absent" code → [`Outcome::Deleted`]
//!    - anything else → `Err(Error::RemoteRejection)` with the remote text
//! 4. Success:
//!    - GET → [`Outcome::Found`] with the raw response
//!    - POST → [`Outcome::Written`] with the *sent* payload
//!    - DELETE → [`Outcome::Deleted`]

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::RulesConfig;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::model::ManagedObject;
use crate::payload::{Annotation, build_payload};
use crate::traits::{Method, Transport};

/// Query modifier that fetches direct children in the same round trip
pub const SUBTREE_CHILDREN: &str = "rsp-subtree=children";

/// Query modifier that suppresses derived properties
pub const CONFIG_ONLY: &str = "rsp-prop-include=config-only";

/// Result of a successful dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// GET returned the object
    Found(Document),

    /// The remote reports no such object
    Absent,

    /// POST accepted; carries the payload that was sent
    Written(Value),

    /// DELETE succeeded, or the object was already gone
    Deleted,
}

/// Path, query and error-code rules applied by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRules {
    /// Error codes that mean "already absent" when deleting
    pub absent_on_delete_codes: BTreeSet<String>,
    /// Classes read without the config-only filter
    pub full_property_classes: BTreeSet<String>,
}

impl Default for DispatchRules {
    fn default() -> Self {
        Self::from(&RulesConfig::default())
    }
}

impl From<&RulesConfig> for DispatchRules {
    fn from(rules: &RulesConfig) -> Self {
        Self {
            absent_on_delete_codes: rules.absent_on_delete_codes.clone(),
            full_property_classes: rules.full_property_classes.clone(),
        }
    }
}

impl DispatchRules {
    /// Path for a request against `dn`
    ///
    /// GET requests that want children fetch the child subtree; otherwise
    /// they ask for config-only properties unless the class is known to
    /// lose wanted properties under that filter.
    pub fn path(&self, method: Method, dn: &str, class_name: &str, with_children: bool) -> String {
        let mut path = format!("/api/mo/{}.json", dn);
        if method == Method::Get {
            if with_children {
                path.push('?');
                path.push_str(SUBTREE_CHILDREN);
            } else if !self.full_property_classes.contains(class_name) {
                path.push('?');
                path.push_str(CONFIG_ONLY);
            }
        }
        path
    }
}

/// Issues single remote operations for a managed object
pub struct Dispatcher {
    transport: Box<dyn Transport>,
    rules: DispatchRules,
    annotation: Option<Annotation>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.transport_name())
            .field("rules", &self.rules)
            .field("annotation", &self.annotation)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// # Parameters
    ///
    /// - `transport`: network capability
    /// - `rules`: path and error-code rules
    /// - `annotation`: marker injected into POST payloads, if enabled
    pub fn new(
        transport: Box<dyn Transport>,
        rules: DispatchRules,
        annotation: Option<Annotation>,
    ) -> Self {
        Self {
            transport,
            rules,
            annotation,
        }
    }

    /// Rules in effect
    pub fn rules(&self) -> &DispatchRules {
        &self.rules
    }

    /// Execute one operation against `object`
    ///
    /// For GET, children are requested iff the object declares any.
    pub async fn execute(&self, method: Method, object: &ManagedObject) -> Result<Outcome> {
        self.execute_with(method, object, object.has_children()).await
    }

    /// Execute one operation, choosing explicitly whether to fetch children
    pub async fn execute_with(
        &self,
        method: Method,
        object: &ManagedObject,
        with_children: bool,
    ) -> Result<Outcome> {
        let path = self
            .rules
            .path(method, &object.dn, &object.class_name, with_children);

        let payload = match method {
            Method::Post => Some(build_payload(
                &object.class_name,
                &object.content,
                &object.children,
                self.annotation.as_ref(),
            )),
            Method::Get | Method::Delete => None,
        };

        debug!("{} {} via {}", method, path, self.transport.transport_name());

        let response = self
            .transport
            .request(method, &path, payload.as_ref())
            .await?;

        self.classify(method, Document::new(response), payload)
    }

    fn classify(&self, method: Method, response: Document, payload: Option<Value>) -> Result<Outcome> {
        if response.is_empty() {
            return Ok(match method {
                Method::Get => Outcome::Absent,
                Method::Delete => Outcome::Deleted,
                Method::Post => Outcome::Written(payload.unwrap_or(Value::Null)),
            });
        }

        if let Some(error) = response.error() {
            if method == Method::Delete && self.rules.absent_on_delete_codes.contains(&error.code) {
                debug!("Ignoring error {} on delete: {}", error.code, error.text);
                return Ok(Outcome::Deleted);
            }
            return Err(Error::rejection(error.code, error.text));
        }

        Ok(match method {
            Method::Get => Outcome::Found(response),
            Method::Post => Outcome::Written(payload.unwrap_or(Value::Null)),
            Method::Delete => Outcome::Deleted,
        })
    }
}
