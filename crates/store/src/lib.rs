//! meshcheck store: immutable resource snapshot and the builder that assembles it.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use meshcheck_core::{Entry, Error, Kind, Resource, ResourceName};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

/// Point-in-time collection of entries, grouped by kind in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: FxHashMap<Kind, Vec<Entry>>,
    index: FxHashSet<(Kind, ResourceName)>,
}

impl Snapshot {
    /// Entries of `kind` in insertion order. Each call starts a fresh iteration.
    pub fn entries(&self, kind: Kind) -> std::slice::Iter<'_, Entry> {
        self.entries.get(&kind).map(|v| v.as_slice()).unwrap_or(&[]).iter()
    }

    pub fn exists(&self, kind: Kind, name: &ResourceName) -> bool {
        self.index.contains(&(kind, name.clone()))
    }

    pub fn get(&self, kind: Kind, name: &ResourceName) -> Option<&Entry> {
        if !self.exists(kind, name) {
            return None;
        }
        self.entries(kind).find(|e| &e.name == name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Entry count per kind, in [`Kind::ALL`] order.
    pub fn counts(&self) -> Vec<(Kind, usize)> {
        Kind::ALL.iter().map(|k| (*k, self.entries(*k).len())).collect()
    }
}

/// A document that could not be turned into an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadIssue {
    pub source: String,
    /// Zero-based document index within the source.
    pub index: usize,
    pub error: String,
}

impl fmt::Display for LoadIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.source, self.index, self.error)
    }
}

/// Builds [`Snapshot`] instances from typed entries or raw manifests.
pub struct SnapshotBuilder {
    default_namespace: String,
    snap: Snapshot,
    issues: Vec<LoadIssue>,
    skipped: usize,
}

impl SnapshotBuilder {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self { default_namespace: default_namespace.into(), snap: Snapshot::default(), issues: Vec::new(), skipped: 0 }
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Add one entry. Identities are unique per kind.
    pub fn insert(&mut self, entry: Entry) -> Result<(), Error> {
        let kind = entry.kind();
        if !self.snap.index.insert((kind, entry.name.clone())) {
            return Err(Error::DuplicateEntry { kind, name: entry.name });
        }
        self.snap.entries.entry(kind).or_default().push(entry);
        Ok(())
    }

    pub fn insert_resource(&mut self, resource: Resource) -> Result<(), Error> {
        let entry = Entry::new(resource, &self.default_namespace)?;
        self.insert(entry)
    }

    /// Add a raw manifest (or a `List` of them). Unmodelled kinds are skipped.
    /// Stops at the first failing item and returns its error; earlier items stay inserted.
    pub fn push_json(&mut self, raw: Json) -> Result<usize, Error> {
        if is_list(&raw) {
            let items = match raw {
                Json::Object(mut obj) => obj.remove("items"),
                _ => None,
            };
            let mut added = 0;
            if let Some(Json::Array(items)) = items {
                for item in items {
                    added += self.push_json(item)?;
                }
            }
            return Ok(added);
        }
        let gvk = type_key(&raw);
        match Resource::from_json(raw)? {
            Some(resource) => {
                self.insert_resource(resource)?;
                Ok(1)
            }
            None => {
                debug!(gvk = %gvk, "kind not modelled; skipping");
                self.skipped += 1;
                Ok(0)
            }
        }
    }

    /// Add every document of a multi-document YAML stream.
    ///
    /// Failures are recorded as [`LoadIssue`]s against `source` and loading carries on with
    /// the next document. A syntax error ends the stream. Returns the number of entries added.
    pub fn push_yaml(&mut self, yaml: &str, source: &str) -> usize {
        let mut added = 0;
        for (index, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let value = match serde_yaml::Value::deserialize(doc) {
                Ok(v) => v,
                Err(e) => {
                    self.record(source, index, Error::Yaml(e));
                    break;
                }
            };
            if value.is_null() {
                continue;
            }
            match serde_json::to_value(value) {
                Ok(json) => added += self.push_object(json, source, index),
                Err(e) => self.record(source, index, Error::Json(e)),
            }
        }
        debug!(source, added, "yaml source loaded");
        added
    }

    /// Like [`push_json`](Self::push_json), but a failure is recorded as a [`LoadIssue`]
    /// for `source`/`index` instead of being returned.
    pub fn push_object(&mut self, raw: Json, source: &str, index: usize) -> usize {
        match self.push_json(raw) {
            Ok(n) => n,
            Err(e) => {
                self.record(source, index, e);
                0
            }
        }
    }

    pub fn issues(&self) -> &[LoadIssue] {
        &self.issues
    }

    /// Number of documents skipped because their kind is not modelled.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn freeze(&self) -> Arc<Snapshot> {
        info!(entries = self.snap.len(), skipped = self.skipped, issues = self.issues.len(), "snapshot frozen");
        Arc::new(self.snap.clone())
    }

    fn record(&mut self, source: &str, index: usize, error: Error) {
        warn!(source, index, error = %error, "document rejected");
        self.issues.push(LoadIssue { source: source.to_string(), index, error: error.to_string() });
    }
}

// `apiVersion/kind` of a raw manifest, for log fields.
fn type_key(raw: &Json) -> String {
    let field = |k: &str| raw.get(k).and_then(|v| v.as_str()).unwrap_or("?");
    format!("{}/{}", field("apiVersion"), field("kind"))
}

fn is_list(raw: &Json) -> bool {
    raw.get("kind").and_then(|k| k.as_str()).map(|k| k.ends_with("List")).unwrap_or(false)
        && raw.get("items").map(|i| i.is_array()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_detection_requires_items_array() {
        assert!(is_list(&serde_json::json!({ "apiVersion": "v1", "kind": "List", "items": [] })));
        assert!(is_list(&serde_json::json!({ "apiVersion": "v1", "kind": "PodList", "items": [] })));
        assert!(!is_list(&serde_json::json!({ "apiVersion": "v1", "kind": "List" })));
        assert!(!is_list(&serde_json::json!({ "apiVersion": "v1", "kind": "Pod", "items": [] })));
    }

    #[test]
    fn unmodelled_kinds_are_counted_not_inserted() {
        let svc = serde_json::json!({ "apiVersion": "v1", "kind": "Service", "metadata": { "name": "s1" } });
        assert_eq!(type_key(&svc), "v1/Service");
        assert_eq!(type_key(&serde_json::json!({})), "?/?");
        let mut b = SnapshotBuilder::new("default");
        assert_eq!(b.push_json(svc).unwrap(), 0);
        assert_eq!(b.skipped(), 1);
        assert!(b.freeze().is_empty());
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let pod = serde_json::json!({ "apiVersion": "v1", "kind": "Pod", "metadata": { "name": "p1", "namespace": "default" } });
        let mut b = SnapshotBuilder::new("default");
        assert_eq!(b.push_json(pod.clone()).unwrap(), 1);
        let err = b.push_json(pod).unwrap_err();
        assert!(matches!(err, Error::DuplicateEntry { kind: Kind::Pod, .. }), "err={}", err);
        assert_eq!(b.freeze().len(), 1);
    }
}
