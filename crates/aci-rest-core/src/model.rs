//! Desired/tracked state of a managed object
//!
//! A [`ManagedObject`] is one remote entity addressed by its distinguished
//! name (dn) plus the direct children the caller declared. Attribute maps
//! are flat `String -> String` maps since the REST API transmits every
//! attribute value as a string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat attribute map ("content")
pub type Attributes = BTreeMap<String, String>;

/// A declared direct child of a managed object
///
/// Children are identified by the pair (relative name, class). The relative
/// name alone is not unique across classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    /// Relative name of the child, e.g. "ctx-prod"
    pub rn: String,

    /// Class of the child, e.g. "fvCtx"
    pub class_name: String,

    /// Tracked attributes of the child
    #[serde(default)]
    pub content: Attributes,
}

impl ChildRef {
    /// Create a child with no tracked attributes
    pub fn new(rn: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            rn: rn.into(),
            class_name: class_name.into(),
            content: Attributes::new(),
        }
    }

    /// Track an attribute with its desired value
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.content.insert(name.into(), value.into());
        self
    }

    /// Whether this child has the given identity
    pub fn matches(&self, rn: &str, class_name: &str) -> bool {
        self.rn == rn && self.class_name == class_name
    }
}

/// A managed object and its declared children
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObject {
    /// Resource identity. Set to the dn once a read succeeds, cleared when
    /// the remote object is confirmed absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Distinguished name, e.g. "uni/tn-prod"
    pub dn: String,

    /// Class of the object, e.g. "fvTenant"
    pub class_name: String,

    /// Tracked attributes
    #[serde(default)]
    pub content: Attributes,

    /// Declared children, in caller order
    #[serde(default, rename = "child")]
    pub children: Vec<ChildRef>,
}

impl ManagedObject {
    /// Create an object with no tracked attributes or children
    pub fn new(dn: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            id: None,
            dn: dn.into(),
            class_name: class_name.into(),
            content: Attributes::new(),
            children: Vec::new(),
        }
    }

    /// Track an attribute with its desired value
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.content.insert(name.into(), value.into());
        self
    }

    /// Declare a child
    pub fn with_child(mut self, child: ChildRef) -> Self {
        self.children.push(child);
        self
    }

    /// Whether at least one child is declared
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Look up a declared child by its (rn, class) identity
    pub fn child(&self, rn: &str, class_name: &str) -> Option<&ChildRef> {
        self.children.iter().find(|c| c.matches(rn, class_name))
    }

    /// Check that the object can be addressed on the remote
    pub fn validate(&self) -> crate::Result<()> {
        if self.dn.is_empty() {
            return Err(crate::Error::invalid_input("dn cannot be empty"));
        }
        if self.class_name.is_empty() {
            return Err(crate::Error::invalid_input("class_name cannot be empty"));
        }
        if self.class_name.contains(':') {
            return Err(crate::Error::invalid_input(format!(
                "class_name must not contain a colon: {}",
                self.class_name
            )));
        }
        for child in &self.children {
            if child.rn.is_empty() || child.class_name.is_empty() {
                return Err(crate::Error::invalid_input(format!(
                    "child of {} needs both rn and class_name",
                    self.dn
                )));
            }
        }
        Ok(())
    }
}
