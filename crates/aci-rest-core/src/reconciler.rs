//! Response reconciler
//!
//! Refreshes tracked state from a remote read. Only keys the caller already
//! tracks are refreshed; attributes and children the caller never declared
//! are never introduced. A declared child missing from the response comes
//! back with empty content so the caller's next diff sees the drift.

use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

use crate::document::{Document, find_in_array, scalar_string, search};
use crate::error::{Error, Result};
use crate::model::{Attributes, ChildRef};

/// Refreshed tracked state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Refreshed parent attributes
    pub content: Attributes,
    /// Refreshed children, in declared order
    pub children: Vec<ChildRef>,
}

/// Extracts tracked attributes and children from remote responses
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    write_only: BTreeSet<String>,
}

impl Reconciler {
    /// Create a reconciler
    ///
    /// Attributes in `write_only` keep their tracked value instead of being
    /// read back.
    pub fn new(write_only: BTreeSet<String>) -> Self {
        Self { write_only }
    }

    /// Refresh tracked attributes and children from a response
    pub fn reconcile(
        &self,
        response: &Document,
        class_name: &str,
        content: &Attributes,
        children: &[ChildRef],
    ) -> Result<Snapshot> {
        let object = object_of(response, class_name)?;
        let attributes = attributes_of(object, class_name)?;

        let content = self.refresh(content, attributes);

        if search(object, &["children"]).is_some_and(|c| !c.is_array()) {
            return Err(Error::reconciliation(format!(
                "children of {} is not a list",
                class_name
            )));
        }

        let children = children
            .iter()
            .map(|child| self.refresh_child(child, object))
            .collect::<Result<Vec<_>>>()?;

        Ok(Snapshot { content, children })
    }

    /// Every attribute of the object except the ignored ones
    pub fn snapshot_all(
        &self,
        response: &Document,
        class_name: &str,
        ignored: &BTreeSet<String>,
    ) -> Result<Attributes> {
        let object = object_of(response, class_name)?;
        let attributes = attributes_of(object, class_name)?;

        Ok(attributes
            .iter()
            .filter(|(name, _)| !ignored.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), scalar_string(value)))
            .collect())
    }

    fn refresh(&self, tracked: &Attributes, remote: &Map<String, Value>) -> Attributes {
        tracked
            .iter()
            .map(|(name, value)| {
                let refreshed = if self.write_only.contains(name) {
                    value.clone()
                } else {
                    remote.get(name).map(scalar_string).unwrap_or_default()
                };
                (name.clone(), refreshed)
            })
            .collect()
    }

    /// Refresh one declared child from the children of `object`
    ///
    /// A child matches on both class and `rn`.
    fn refresh_child(&self, child: &ChildRef, object: &Value) -> Result<ChildRef> {
        let attributes_path = [child.class_name.as_str(), "attributes"];
        let found = find_in_array(object, &["children"], |entry| {
            search(entry, &[child.class_name.as_str(), "attributes", "rn"])
                .is_some_and(|rn| scalar_string(rn) == child.rn)
        })
        .and_then(|entry| search(entry, &attributes_path));

        let content = match found {
            Some(Value::Object(attributes)) => self.refresh(&child.content, attributes),
            Some(_) => {
                return Err(Error::reconciliation(format!(
                    "attributes of child {} ({}) is not an object",
                    child.rn, child.class_name
                )));
            }
            None => {
                debug!("Child {} ({}) not found in response", child.rn, child.class_name);
                Attributes::new()
            }
        };

        Ok(ChildRef {
            rn: child.rn.clone(),
            class_name: child.class_name.clone(),
            content,
        })
    }
}

fn object_of<'a>(response: &'a Document, class_name: &str) -> Result<&'a Value> {
    if response.first_entry().is_none() {
        return Err(Error::reconciliation("response has no imdata entry"));
    }
    response.object(class_name).ok_or_else(|| {
        Error::reconciliation(format!("response does not contain a {} object", class_name))
    })
}

fn attributes_of<'a>(object: &'a Value, class_name: &str) -> Result<&'a Map<String, Value>> {
    search(object, &["attributes"])
        .and_then(Value::as_object)
        .ok_or_else(|| Error::reconciliation(format!("{} has no attribute map", class_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::build_payload;
    use proptest::prelude::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(["childAction".to_string()].into_iter().collect())
    }

    fn tenant_response() -> Document {
        Document::new(json!({
            "imdata": [{
                "fvTenant": {
                    "attributes": {
                        "dn": "uni/tn-a",
                        "name": "a",
                        "descr": "changed out of band",
                        "modTs": "2024-01-01T00:00:00"
                    },
                    "children": [
                        { "fvCtx": { "attributes": { "rn": "ctx-x", "name": "x", "pcEnfPref": "enforced" } } },
                        { "fvBD": { "attributes": { "rn": "ctx-x", "name": "not-a-ctx" } } }
                    ]
                }
            }]
        }))
    }

    #[test]
    fn refreshes_only_tracked_attributes() {
        let snapshot = reconciler()
            .reconcile(
                &tenant_response(),
                "fvTenant",
                &attrs(&[("name", "a"), ("descr", "desired"), ("childAction", "")]),
                &[],
            )
            .unwrap();

        assert_eq!(
            snapshot.content,
            attrs(&[("name", "a"), ("descr", "changed out of band"), ("childAction", "")])
        );
        assert!(snapshot.children.is_empty());
    }

    #[test]
    fn children_match_on_rn_and_class() {
        let declared = vec![
            ChildRef::new("ctx-x", "fvBD").with_attr("name", "desired"),
            ChildRef::new("ctx-x", "fvCtx").with_attr("name", "x"),
        ];

        let snapshot = reconciler()
            .reconcile(&tenant_response(), "fvTenant", &Attributes::new(), &declared)
            .unwrap();

        assert_eq!(snapshot.children[0].content, attrs(&[("name", "not-a-ctx")]));
        assert_eq!(snapshot.children[1].content, attrs(&[("name", "x")]));
    }

    #[test]
    fn missing_child_yields_empty_content() {
        let declared = vec![ChildRef::new("ctx-X", "fvCtx").with_attr("name", "X")];

        let snapshot = reconciler()
            .reconcile(&tenant_response(), "fvTenant", &Attributes::new(), &declared)
            .unwrap();

        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].rn, "ctx-X");
        assert!(snapshot.children[0].content.is_empty());
    }

    #[test]
    fn reconciling_twice_is_a_fixed_point() {
        let declared = vec![ChildRef::new("ctx-x", "fvCtx").with_attr("name", "stale")];
        let content = attrs(&[("descr", "stale"), ("nameAlias", "")]);
        let response = tenant_response();

        let first = reconciler()
            .reconcile(&response, "fvTenant", &content, &declared)
            .unwrap();
        let second = reconciler()
            .reconcile(&response, "fvTenant", &first.content, &first.children)
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn malformed_responses_are_errors() {
        let r = reconciler();
        let empty = Attributes::new();

        let no_entry = Document::new(json!({"imdata": []}));
        assert!(matches!(r.reconcile(&no_entry, "fvTenant", &empty, &[]), Err(Error::Reconciliation(_))));

        let wrong_class = Document::new(json!({"imdata": [{"fvCtx": {"attributes": {}}}]}));
        assert!(r.reconcile(&wrong_class, "fvTenant", &empty, &[]).is_err());

        let bad_children = Document::new(json!({"imdata": [{"fvTenant": {"attributes": {}, "children": {}}}]}));
        assert!(r.reconcile(&bad_children, "fvTenant", &empty, &[]).is_err());
    }

    #[test]
    fn snapshot_all_drops_ignored_attributes() {
        let ignored = ["dn".to_string(), "modTs".to_string()].into_iter().collect();

        let content = reconciler()
            .snapshot_all(&tenant_response(), "fvTenant", &ignored)
            .unwrap();

        assert_eq!(content, attrs(&[("name", "a"), ("descr", "changed out of band")]));
    }

    /// What the remote would answer after storing `payload` verbatim
    fn echo(payload: &Value, class_name: &str) -> Document {
        let mut object = payload.clone();
        if let Some(children) = object[class_name]["children"].as_array_mut() {
            for child in children {
                let Some(body) = child.as_object_mut().and_then(|m| m.values_mut().next()) else {
                    continue;
                };
                let rn = format!("ctx-{}", body["attributes"]["name"].as_str().unwrap_or_default());
                body["attributes"]["rn"] = Value::String(rn);
            }
        }
        Document::new(json!({ "imdata": [object] }))
    }

    proptest! {
        #[test]
        fn echoed_payload_reconciles_to_itself(
            content in prop::collection::btree_map("[a-z]{3,8}", "[a-zA-Z0-9 ._-]{0,12}", 0..6),
            names in prop::collection::btree_set("[a-z0-9]{1,6}", 0..4),
        ) {
            let children: Vec<ChildRef> = names
                .iter()
                .map(|name| ChildRef::new(format!("ctx-{}", name), "fvCtx").with_attr("name", name.as_str()))
                .collect();

            let payload = build_payload("fvTenant", &content, &children, None);
            let snapshot = reconciler()
                .reconcile(&echo(&payload, "fvTenant"), "fvTenant", &content, &children)
                .unwrap();

            prop_assert_eq!(snapshot.content, content);
            prop_assert_eq!(snapshot.children, children);
        }
    }
}
