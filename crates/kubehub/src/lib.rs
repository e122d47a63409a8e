//! meshcheck kubehub: discovery and listing of the analyzed kinds from a live cluster.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use futures::future::join_all;
use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use meshcheck_core::Kind;
use meshcheck_store::SnapshotBuilder;
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client (kubeconfig or in-cluster)")
}

/// Locate the served resource for `kind`, taking whichever version discovery recommends.
fn find_api_resource(discovery: &Discovery, kind: Kind) -> Option<(ApiResource, bool)> {
    for group in discovery.groups() {
        if group.name() != kind.group() {
            continue;
        }
        for (ar, caps) in group.recommended_resources() {
            if ar.kind == kind.kind() {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Some((ar, namespaced));
            }
        }
    }
    None
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

// List items come back without apiVersion/kind; restore them from the resource we listed.
fn normalize(mut raw: Json, ar: &ApiResource) -> Json {
    strip_managed_fields(&mut raw);
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("apiVersion".into(), Json::String(ar.api_version.clone()));
        obj.insert("kind".into(), Json::String(ar.kind.clone()));
    }
    raw
}

/// List every object of one resource, scoped to `namespace` when the resource is namespaced.
pub async fn list_resource(client: Client, ar: &ApiResource, namespaced: bool, namespace: Option<&str>) -> Result<Vec<Json>> {
    let api: Api<DynamicObject> = match (namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client, ns, ar),
        _ => Api::all_with(client, ar),
    };
    let list = api
        .list(&ListParams::default())
        .await
        .with_context(|| format!("listing {}/{}", ar.api_version, ar.kind))?;
    let mut out = Vec::with_capacity(list.items.len());
    for obj in list.items {
        let raw = serde_json::to_value(&obj).context("serializing DynamicObject")?;
        out.push(normalize(raw, ar));
    }
    Ok(out)
}

/// Add the cluster's current objects of every analyzed kind to `builder`.
///
/// Kinds the cluster does not serve, and kinds whose listing fails, are skipped with a warning.
/// Returns the number of entries added.
pub async fn load_into(builder: &mut SnapshotBuilder, namespace: Option<&str>) -> Result<usize> {
    let client = get_kube_client().await?;
    let mut groups: Vec<&str> = Kind::ALL.iter().map(|k| k.group()).collect();
    groups.sort_unstable();
    groups.dedup();
    let discovery = Discovery::new(client.clone())
        .filter(&groups)
        .run()
        .await
        .context("running API discovery")?;

    let targets: Vec<(Kind, ApiResource, bool)> = Kind::ALL
        .iter()
        .filter_map(|k| match find_api_resource(&discovery, *k) {
            Some((ar, namespaced)) => Some((*k, ar, namespaced)),
            None => {
                warn!(gvk = %k.gvk_key(), "kind not served by cluster; skipping");
                None
            }
        })
        .collect();

    let lists = join_all(targets.iter().map(|(kind, ar, namespaced)| {
        let client = client.clone();
        async move { (*kind, ar, list_resource(client, ar, *namespaced, namespace).await) }
    }))
    .await;

    let mut added = 0;
    for (kind, ar, res) in lists {
        match res {
            Ok(items) => {
                debug!(kind = %kind, version = %ar.version, count = items.len(), "listed");
                counter!("cluster_objects_listed_total", items.len() as u64, "kind" => kind.kind());
                let source = format!("cluster:{}/{}", ar.api_version, ar.kind);
                for (i, raw) in items.into_iter().enumerate() {
                    added += builder.push_object(raw, &source, i);
                }
            }
            Err(e) => warn!(kind = %kind, error = ?e, "list failed; skipping kind"),
        }
    }
    info!(added, ns = ?namespace, "cluster resources loaded");
    Ok(added)
}
