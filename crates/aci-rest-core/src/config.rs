//! Configuration types for the ACI REST engine
//!
//! This module defines the connection settings, retry schedule, and the
//! class/attribute rule tables consumed by the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::payload::Annotation;

/// Largest accepted retry bound
pub const MAX_RETRIES: u32 = 9;

/// Main configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Base URL of the controller, e.g. "https://apic.example.com"
    pub url: String,

    /// Account name
    pub username: String,

    /// Password (password based sessions)
    #[serde(default)]
    pub password: Option<String>,

    /// Private key path (signature based sessions)
    #[serde(default)]
    pub private_key: Option<String>,

    /// Certificate name of the user (signature based sessions)
    #[serde(default)]
    pub cert_name: Option<String>,

    /// Proxy server URL with port number
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Accept invalid TLS certificates
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Attempts per remote operation (0-9)
    ///
    /// Every operation makes at least one attempt, so 0 behaves like 1.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Tag written objects with the orchestration annotation
    #[serde(default = "default_annotate")]
    pub annotate: bool,

    /// Use the in-memory transport instead of the network
    #[serde(default)]
    pub mock: bool,

    /// Backoff schedule
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Class and attribute rule tables
    #[serde(default)]
    pub rules: RulesConfig,
}

// Credentials stay out of Debug output
impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("private_key", &self.private_key)
            .field("cert_name", &self.cert_name)
            .field("proxy_url", &self.proxy_url)
            .field("insecure", &self.insecure)
            .field("retries", &self.retries)
            .field("annotate", &self.annotate)
            .field("mock", &self.mock)
            .field("backoff", &self.backoff)
            .field("rules", &self.rules)
            .finish()
    }
}

impl RestConfig {
    /// Create a configuration with defaults for everything but the endpoint
    pub fn new(url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: None,
            private_key: None,
            cert_name: None,
            proxy_url: None,
            insecure: default_insecure(),
            retries: default_retries(),
            annotate: default_annotate(),
            mock: false,
            backoff: BackoffConfig::default(),
            rules: RulesConfig::default(),
        }
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the retry bound
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.username.is_empty() {
            return Err(crate::Error::config("username must be provided"));
        }

        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        if !has_password {
            let has_key = self.private_key.as_deref().is_some_and(|k| !k.is_empty());
            let has_cert = self.cert_name.as_deref().is_some_and(|c| !c.is_empty());
            match (has_key, has_cert) {
                (false, false) => {
                    return Err(crate::Error::config(
                        "either password or private_key/cert_name is required",
                    ));
                }
                (true, false) | (false, true) => {
                    return Err(crate::Error::config(
                        "private_key and cert_name both must be provided",
                    ));
                }
                (true, true) => {}
            }
        }

        if self.url.is_empty() {
            return Err(crate::Error::config("url must be provided"));
        }

        if self.retries > MAX_RETRIES {
            return Err(crate::Error::config(format!(
                "retries must be between 0 and {} inclusive, got: {}",
                MAX_RETRIES, self.retries
            )));
        }

        self.backoff.validate()?;

        Ok(())
    }

    /// The annotation to apply on writes, if enabled
    pub fn annotation(&self) -> Option<Annotation> {
        self.annotate.then(|| self.rules.annotation())
    }
}

/// Backoff schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Minimum delay between attempts (in milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Exponential growth factor per attempt
    #[serde(default = "default_factor")]
    pub factor: u32,

    /// Cap for the exponential delay (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffConfig {
    /// Validate the schedule
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.factor == 0 {
            return Err(crate::Error::config("backoff factor must be >= 1"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(crate::Error::config(format!(
                "backoff base delay ({}ms) exceeds max delay ({}ms)",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Class and attribute rule tables
///
/// These are environment specific and kept as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Error codes that mean "already absent" when deleting
    #[serde(default = "default_absent_on_delete_codes")]
    pub absent_on_delete_codes: BTreeSet<String>,

    /// Classes for which the config-only filter drops wanted properties
    #[serde(default = "default_full_property_classes")]
    pub full_property_classes: BTreeSet<String>,

    /// Value of the orchestration annotation
    #[serde(default = "default_annotation_value")]
    pub annotation_value: String,

    /// Classes that do not accept the annotation
    #[serde(default = "default_no_annotation_classes")]
    pub no_annotation_classes: BTreeSet<String>,

    /// Attributes that are written but never read back
    #[serde(default = "default_write_only_attributes")]
    pub write_only_attributes: BTreeSet<String>,

    /// Attributes never tracked when importing an object
    #[serde(default = "default_ignored_attributes")]
    pub ignored_attributes: BTreeSet<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            absent_on_delete_codes: default_absent_on_delete_codes(),
            full_property_classes: default_full_property_classes(),
            annotation_value: default_annotation_value(),
            no_annotation_classes: default_no_annotation_classes(),
            write_only_attributes: default_write_only_attributes(),
            ignored_attributes: default_ignored_attributes(),
        }
    }
}

impl RulesConfig {
    /// The annotation described by these rules
    pub fn annotation(&self) -> Annotation {
        Annotation::new(self.annotation_value.clone())
            .excluding(self.no_annotation_classes.iter().cloned())
    }
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_insecure() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_annotate() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    4_000
}

fn default_factor() -> u32 {
    3
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_absent_on_delete_codes() -> BTreeSet<String> {
    set(&["1", "107"])
}

fn default_full_property_classes() -> BTreeSet<String> {
    set(&["firmwareFwGrp", "maintMaintGrp", "maintMaintP", "firmwareFwP"])
}

fn default_annotation_value() -> String {
    "orchestrator:aci-rest".to_string()
}

fn default_no_annotation_classes() -> BTreeSet<String> {
    set(&["tagAnnotation", "tagTag"])
}

fn default_write_only_attributes() -> BTreeSet<String> {
    set(&["childAction"])
}

fn default_ignored_attributes() -> BTreeSet<String> {
    set(&[
        "extMngdBy",
        "lcOwn",
        "modTs",
        "monPolDn",
        "uid",
        "dn",
        "rn",
        "configQual",
        "configSt",
        "virtualIp",
    ])
}
