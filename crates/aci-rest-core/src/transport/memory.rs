// # Memory Transport
//
// In-memory emulation of the REST object store.
//
// ## Purpose
//
// Backs "mock" mode and tests: nothing leaves the process, and all state is
// lost when the transport is dropped.
//
// ## Behaviour
//
// - POST merges attributes into the stored object and upserts its children;
//   `status="deleted"` on the object or `childAction`/`status` "deleted" on
//   a child removes it
// - GET returns the object, with direct children when `rsp-subtree=children`
//   is requested, or an empty `imdata` when the object does not exist;
//   operational attributes (`modTs`, `lcOwn`, `uid`) are left out when
//   `rsp-prop-include=config-only` is requested
// - DELETE removes the object and everything below it
//
// Children posted without an `rn` attribute get one derived from a
// class → prefix naming table as `<prefix>-<name>`.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::dispatcher::{CONFIG_ONLY, SUBTREE_CHILDREN};
use crate::error::{Error, Result};
use crate::traits::{Method, Transport};

const MO_PREFIX: &str = "/api/mo/";

/// Attributes the store maintains itself, rendered unless config-only
const OPERATIONAL_ATTRIBUTES: [(&str, &str); 3] = [("lcOwn", "local"), ("modTs", "never"), ("uid", "0")];

/// A scripted failure for the next request
#[derive(Debug, Clone)]
enum Failure {
    /// Fail the round trip itself
    Transport(String),
    /// Reply with an error document
    Reject { code: String, text: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    class_name: String,
    attributes: Map<String, Value>,
    /// Direct children, by dn, in insertion order
    children: Vec<String>,
}

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<String, StoredObject>,
    failures: VecDeque<Failure>,
    requests: Vec<(Method, String)>,
}

/// In-memory transport
///
/// # Example
///
/// ```rust,no_run
/// use aci_rest_core::transport::MemoryTransport;
/// use aci_rest_core::traits::{Method, Transport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = MemoryTransport::new();
///     let body = serde_json::json!({"fvTenant": {"attributes": {"name": "a"}}});
///
///     transport.request(Method::Post, "/api/mo/uni/tn-a.json", Some(&body)).await?;
///     assert!(transport.contains("uni/tn-a").await);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Store>>,
    naming: Arc<HashMap<String, String>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Create an empty store with the default naming table
    pub fn new() -> Self {
        let naming = [
            ("fvTenant", "tn"),
            ("fvCtx", "ctx"),
            ("fvBD", "BD"),
            ("fvAp", "ap"),
            ("fvAEPg", "epg"),
            ("vzBrCP", "brc"),
            ("vzFilter", "flt"),
            ("vzSubj", "subj"),
            ("l3extOut", "out"),
        ]
        .into_iter()
        .map(|(class, prefix)| (class.to_string(), prefix.to_string()))
        .collect();

        Self {
            inner: Arc::new(Mutex::new(Store::default())),
            naming: Arc::new(naming),
        }
    }

    /// Add or replace a class → rn prefix naming rule
    pub fn with_naming(mut self, class_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.naming).insert(class_name.into(), prefix.into());
        self
    }

    /// Fail the next `count` requests at the transport level
    pub async fn fail_next(&self, count: usize, message: impl Into<String>) {
        let message = message.into();
        let mut store = self.inner.lock().await;
        for _ in 0..count {
            store.failures.push_back(Failure::Transport(message.clone()));
        }
    }

    /// Answer the next `count` requests with an error document
    pub async fn reject_next(&self, count: usize, code: impl Into<String>, text: impl Into<String>) {
        let (code, text) = (code.into(), text.into());
        let mut store = self.inner.lock().await;
        for _ in 0..count {
            store.failures.push_back(Failure::Reject {
                code: code.clone(),
                text: text.clone(),
            });
        }
    }

    /// Change one attribute out of band (simulates drift)
    pub async fn set_attribute(&self, dn: &str, name: &str, value: &str) -> bool {
        let mut store = self.inner.lock().await;
        match store.objects.get_mut(dn) {
            Some(object) => {
                object
                    .attributes
                    .insert(name.to_string(), Value::String(value.to_string()));
                true
            }
            None => false,
        }
    }

    /// Remove an object out of band
    pub async fn remove(&self, dn: &str) -> bool {
        let mut store = self.inner.lock().await;
        remove_tree(&mut store, dn)
    }

    /// Whether an object exists
    pub async fn contains(&self, dn: &str) -> bool {
        self.inner.lock().await.objects.contains_key(dn)
    }

    /// Stored attributes of an object
    pub async fn attributes(&self, dn: &str) -> Option<Map<String, Value>> {
        self.inner
            .lock()
            .await
            .objects
            .get(dn)
            .map(|o| o.attributes.clone())
    }

    /// Number of stored objects, children included
    pub async fn len(&self) -> usize {
        self.inner.lock().await.objects.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.objects.is_empty()
    }

    /// Every request seen so far
    pub async fn requests(&self) -> Vec<(Method, String)> {
        self.inner.lock().await.requests.clone()
    }

    fn child_rn(&self, class_name: &str, attributes: &Map<String, Value>) -> Result<String> {
        if let Some(rn) = attributes.get("rn").and_then(Value::as_str) {
            return Ok(rn.to_string());
        }
        let prefix = self.naming.get(class_name).ok_or_else(|| {
            Error::invalid_input(format!("no rn and no naming rule for class {}", class_name))
        })?;
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_input(format!("{} child needs a name or rn", class_name)))?;
        Ok(format!("{}-{}", prefix, name))
    }

    fn post(&self, store: &mut Store, dn: &str, body: &Value) -> Value {
        let Some((class_name, object)) = body.as_object().and_then(|m| m.iter().next()) else {
            return error_document("400", "request body must hold one object");
        };
        let attributes = object
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        if let Some(existing) = store.objects.get(dn) {
            if &existing.class_name != class_name {
                return error_document(
                    "103",
                    &format!("{} is a {}, not a {}", dn, existing.class_name, class_name),
                );
            }
        }

        if is_deleted(&attributes, "status") {
            remove_tree(store, dn);
            return empty_document();
        }

        upsert(store, dn, class_name, attributes);

        let children = object
            .get("children")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for child in &children {
            let Some((child_class, child_object)) = child.as_object().and_then(|m| m.iter().next())
            else {
                continue;
            };
            let child_attributes = child_object
                .get("attributes")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let rn = match self.child_rn(child_class, &child_attributes) {
                Ok(rn) => rn,
                Err(e) => return error_document("400", &e.to_string()),
            };
            let child_dn = format!("{}/{}", dn, rn);

            if is_deleted(&child_attributes, "childAction") || is_deleted(&child_attributes, "status") {
                remove_tree(store, &child_dn);
                continue;
            }

            let mut child_attributes = child_attributes;
            child_attributes.remove("childAction");
            child_attributes.insert("rn".to_string(), Value::String(rn));
            upsert(store, &child_dn, child_class, child_attributes);

            if let Some(parent) = store.objects.get_mut(dn) {
                if !parent.children.contains(&child_dn) {
                    parent.children.push(child_dn);
                }
            }
        }

        empty_document()
    }

    fn get(&self, store: &Store, dn: &str, query: Option<&str>) -> Value {
        let Some(object) = store.objects.get(dn) else {
            return empty_document();
        };
        let config_only = query == Some(CONFIG_ONLY);

        let mut body = Map::new();
        body.insert(
            "attributes".to_string(),
            Value::Object(rendered(dn, object, config_only)),
        );

        if query == Some(SUBTREE_CHILDREN) {
            let children: Vec<Value> = object
                .children
                .iter()
                .filter_map(|child_dn| {
                    let child = store.objects.get(child_dn)?;
                    let attributes = rendered(child_dn, child, config_only);
                    Some(json!({ child.class_name.as_str(): { "attributes": attributes } }))
                })
                .collect();
            body.insert("children".to_string(), Value::Array(children));
        }

        json!({
            "totalCount": "1",
            "imdata": [ { object.class_name.as_str(): Value::Object(body) } ]
        })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut store = self.inner.lock().await;
        store.requests.push((method, path.to_string()));

        match store.failures.pop_front() {
            Some(Failure::Transport(message)) => return Err(Error::transport(message)),
            Some(Failure::Reject { code, text }) => return Ok(error_document(&code, &text)),
            None => {}
        }

        let (dn, query) = parse_path(path)?;
        debug!("memory transport: {} {}", method, dn);

        Ok(match method {
            Method::Get => self.get(&store, dn, query),
            Method::Post => match body {
                Some(body) => self.post(&mut store, dn, body),
                None => error_document("400", "POST without a body"),
            },
            Method::Delete => {
                remove_tree(&mut store, dn);
                empty_document()
            }
        })
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}

fn parse_path(path: &str) -> Result<(&str, Option<&str>)> {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    let dn = path
        .strip_prefix(MO_PREFIX)
        .and_then(|p| p.strip_suffix(".json"))
        .filter(|dn| !dn.is_empty())
        .ok_or_else(|| Error::transport(format!("unsupported path: {}", path)))?;
    Ok((dn, query))
}

fn upsert(store: &mut Store, dn: &str, class_name: &str, attributes: Map<String, Value>) {
    let object = store
        .objects
        .entry(dn.to_string())
        .or_insert_with(|| StoredObject {
            class_name: class_name.to_string(),
            attributes: Map::new(),
            children: Vec::new(),
        });
    object.attributes.extend(attributes);
}

fn remove_tree(store: &mut Store, dn: &str) -> bool {
    let Some(object) = store.objects.remove(dn) else {
        return false;
    };
    for child in object.children {
        remove_tree(store, &child);
    }
    if let Some((parent_dn, _)) = dn.rsplit_once('/') {
        if let Some(parent) = store.objects.get_mut(parent_dn) {
            parent.children.retain(|c| c != dn);
        }
    }
    true
}

fn rendered(dn: &str, object: &StoredObject, config_only: bool) -> Map<String, Value> {
    let mut attributes = object.attributes.clone();
    if !config_only {
        for (name, value) in OPERATIONAL_ATTRIBUTES {
            attributes
                .entry(name.to_string())
                .or_insert_with(|| Value::String(value.to_string()));
        }
    }
    attributes.insert("dn".to_string(), Value::String(dn.to_string()));
    attributes
        .entry("rn".to_string())
        .or_insert_with(|| Value::String(dn.rsplit('/').next().unwrap_or(dn).to_string()));
    attributes
}

fn is_deleted(attributes: &Map<String, Value>, key: &str) -> bool {
    attributes.get(key).and_then(Value::as_str) == Some("deleted")
}

fn empty_document() -> Value {
    json!({ "totalCount": "0", "imdata": [] })
}

fn error_document(code: &str, text: &str) -> Value {
    json!({
        "totalCount": "1",
        "imdata": [ { "error": { "attributes": { "code": code, "text": text } } } ]
    })
}
