//! Payload builder
//!
//! Turns a desired object into the nested wire document the REST API
//! expects for a full-object POST. Every declared attribute is re-sent on
//! each write; attributes the caller does not declare are simply omitted.

use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

use crate::model::{Attributes, ChildRef};

/// Attribute name used for the orchestration marker
pub const ANNOTATION_ATTRIBUTE: &str = "annotation";

/// Orchestration marker injected into written objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Marker value, e.g. "orchestrator:aci-rest"
    pub value: String,

    /// Classes that do not accept the marker
    pub excluded_classes: BTreeSet<String>,
}

impl Annotation {
    /// Create a marker applied to every class
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            excluded_classes: BTreeSet::new(),
        }
    }

    /// Exclude classes from annotation
    pub fn excluding<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_classes.extend(classes.into_iter().map(Into::into));
        self
    }

    /// Whether objects of this class get the marker
    pub fn applies_to(&self, class_name: &str) -> bool {
        !self.excluded_classes.contains(class_name)
    }
}

/// Build the wire document for an object and its children
///
/// The marker is inserted before the declared attributes, so a caller that
/// declares `annotation` itself keeps its own value. Children are emitted in
/// declared order.
pub fn build_payload(
    class_name: &str,
    content: &Attributes,
    children: &[ChildRef],
    annotation: Option<&Annotation>,
) -> Value {
    let children: Vec<Value> = children
        .iter()
        .map(|child| {
            json!({
                child.class_name.as_str(): {
                    "attributes": attribute_map(&child.class_name, &child.content, annotation),
                }
            })
        })
        .collect();

    json!({
        class_name: {
            "attributes": attribute_map(class_name, content, annotation),
            "children": children,
        }
    })
}

fn attribute_map(class_name: &str, content: &Attributes, annotation: Option<&Annotation>) -> Map<String, Value> {
    let mut attributes = Map::new();

    if let Some(annotation) = annotation.filter(|a| a.applies_to(class_name)) {
        attributes.insert(
            ANNOTATION_ATTRIBUTE.to_string(),
            Value::String(annotation.value.clone()),
        );
    }

    for (name, value) in content {
        attributes.insert(name.clone(), Value::String(value.clone()));
    }

    attributes
}
