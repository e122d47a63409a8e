//! meshcheck analysis: the context analyzers query, and the analyzers themselves.
//!
//! An [`Analyzer`] is a named, stateless rule. It pulls entries through a [`Context`],
//! checks them against the rest of the snapshot, and reports [`Message`]s back through
//! the same context. Nothing is returned; a pass over an unchanged snapshot always
//! reports the same multiset of messages.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::marker::PhantomData;

use meshcheck_core::msg::Message;
use meshcheck_core::{Entry, Kind, Payload, ResourceName};
use meshcheck_store::Snapshot;
use serde::Serialize;
use tracing::trace;

pub mod analyzers;
pub mod runner;

pub use runner::{run, Report, Settings, Suppression};

/// Read-only query surface over one snapshot, plus the diagnostic sink.
pub trait Context {
    /// Entries of `kind`, lazily. Dropping the iterator stops the scan.
    fn entries(&self, kind: Kind) -> Box<dyn Iterator<Item = &Entry> + '_>;

    fn exists(&self, kind: Kind, name: &ResourceName) -> bool;

    /// Record a finding attributed to an entry of `kind`.
    fn report(&self, kind: Kind, message: Message);
}

/// Typed views over any [`Context`].
pub trait ContextExt: Context {
    /// Entries of `T::KIND` paired with their typed payload.
    fn typed<T: Payload>(&self) -> TypedEntries<'_, T> {
        TypedEntries { inner: self.entries(T::KIND), _payload: PhantomData }
    }
}

impl<C: Context + ?Sized> ContextExt for C {}

pub struct TypedEntries<'a, T> {
    inner: Box<dyn Iterator<Item = &'a Entry> + 'a>,
    _payload: PhantomData<fn() -> T>,
}

impl<'a, T: Payload + 'a> Iterator for TypedEntries<'a, T> {
    type Item = (&'a Entry, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        match T::cast(&entry.resource) {
            Some(payload) => Some((entry, payload)),
            // Entries are filed under the kind of their own payload, so this is a wiring bug.
            None => unreachable!("{} {} listed under {}", entry.kind(), entry.name, T::KIND),
        }
    }
}

/// [`Context`] backed by a [`Snapshot`], buffering reported messages for one pass.
pub struct SnapshotContext<'a> {
    snapshot: &'a Snapshot,
    messages: RefCell<Vec<Message>>,
}

impl<'a> SnapshotContext<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self { snapshot, messages: RefCell::new(Vec::new()) }
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages.into_inner()
    }
}

impl Context for SnapshotContext<'_> {
    fn entries(&self, kind: Kind) -> Box<dyn Iterator<Item = &Entry> + '_> {
        Box::new(self.snapshot.entries(kind))
    }

    fn exists(&self, kind: Kind, name: &ResourceName) -> bool {
        self.snapshot.exists(kind, name)
    }

    fn report(&self, kind: Kind, message: Message) {
        debug_assert_eq!(kind, message.origin.kind, "message reported under the wrong kind");
        trace!(kind = %kind, origin = %message.origin, code = message.code(), "report");
        self.messages.borrow_mut().push(message);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerMetadata {
    /// Stable unique name, used to disable the analyzer and to attribute its output.
    pub name: &'static str,
    pub description: &'static str,
    pub inputs: &'static [Kind],
}

/// A named, stateless check run once per snapshot.
pub trait Analyzer: Send + Sync {
    fn metadata(&self) -> AnalyzerMetadata;

    fn name(&self) -> &'static str {
        self.metadata().name
    }

    /// Run every check over `ctx`; findings travel through [`Context::report`].
    fn analyze(&self, ctx: &dyn Context);
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use meshcheck_store::SnapshotBuilder;

    fn snapshot() -> std::sync::Arc<Snapshot> {
        let mut b = SnapshotBuilder::new("default");
        for name in ["a", "b", "c"] {
            b.push_json(serde_json::json!({ "apiVersion": "v1", "kind": "Pod", "metadata": { "name": name } }))
                .unwrap();
        }
        b.freeze()
    }

    #[test]
    fn typed_view_pairs_entries_with_payloads() {
        let snap = snapshot();
        let ctx = SnapshotContext::new(&snap);
        let names: Vec<_> = ctx
            .typed::<Pod>()
            .map(|(e, pod)| (e.name.to_string(), pod.metadata.name.clone().unwrap_or_default()))
            .collect();
        assert_eq!(names, vec![
            ("default/a".to_string(), "a".to_string()),
            ("default/b".to_string(), "b".to_string()),
            ("default/c".to_string(), "c".to_string()),
        ]);
    }

    #[test]
    fn stopping_consumption_ends_the_scan() {
        let snap = snapshot();
        let ctx = SnapshotContext::new(&snap);
        let mut visited = Vec::new();
        for (e, _) in ctx.typed::<Pod>() {
            visited.push(e.local_name().to_string());
            if e.local_name() == "b" {
                break;
            }
        }
        assert_eq!(visited, vec!["a", "b"]);
        // a fresh iteration starts from the beginning
        assert_eq!(ctx.entries(Kind::Pod).count(), 3);
    }

    #[test]
    fn reports_are_buffered_in_order() {
        let snap = snapshot();
        let ctx = SnapshotContext::new(&snap);
        for e in ctx.entries(Kind::Pod) {
            ctx.report(Kind::Pod, meshcheck_core::msg::internal_error(e, e.local_name()));
        }
        let msgs = ctx.into_messages();
        let params: Vec<_> = msgs.iter().map(|m| m.params[0].clone()).collect();
        assert_eq!(params, vec!["a", "b", "c"]);
    }
}
