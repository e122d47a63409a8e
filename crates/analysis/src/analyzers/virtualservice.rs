//! Checks centred on VirtualService gateway references.

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Pod;
use meshcheck_core::msg;
use meshcheck_core::{Entry, Kind, ResourceName, VirtualService};
use tracing::debug;

use crate::{Analyzer, AnalyzerMetadata, Context, ContextExt};

/// Name of the mesh's own sidecar-injection webhook configuration.
pub const SIDECAR_INJECTOR_WEBHOOK: &str = "istio-sidecar-injector";

/// Reports VirtualServices pointing at gateways absent from the snapshot.
///
/// Also carries two structural checks: pods with exactly one init container, and the
/// namespace-selector labels of the sidecar-injector webhook.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayAnalyzer;

impl Analyzer for GatewayAnalyzer {
    fn metadata(&self) -> AnalyzerMetadata {
        AnalyzerMetadata {
            name: "virtualservice.GatewayAnalyzer",
            description: "Checks the gateways associated with each virtual service",
            inputs: &[Kind::VirtualService, Kind::Gateway, Kind::Pod, Kind::MutatingWebhookConfiguration],
        }
    }

    fn analyze(&self, ctx: &dyn Context) {
        for (entry, vs) in ctx.typed::<VirtualService>() {
            analyze_virtual_service(ctx, entry, vs);
        }
        for (entry, pod) in ctx.typed::<Pod>() {
            analyze_pod(ctx, entry, pod);
        }
        for (entry, config) in ctx.typed::<MutatingWebhookConfiguration>() {
            analyze_webhook_config(ctx, entry, config);
        }
    }
}

fn analyze_virtual_service(ctx: &dyn Context, entry: &Entry, vs: &VirtualService) {
    let ns = entry.namespace();
    for gw in &vs.spec.gateways {
        let target = ResourceName::resolve_reference(ns, gw);
        if !ctx.exists(Kind::Gateway, &target) {
            ctx.report(Kind::VirtualService, msg::referenced_resource_not_found(entry, "gateway", gw));
        }
    }
}

fn analyze_pod(ctx: &dyn Context, entry: &Entry, pod: &Pod) {
    let init = pod.spec.as_ref().and_then(|s| s.init_containers.as_deref()).unwrap_or_default();
    if let [only] = init {
        ctx.report(Kind::Pod, msg::internal_error(entry, only.image.clone().unwrap_or_default()));
    }
}

fn analyze_webhook_config(ctx: &dyn Context, entry: &Entry, config: &MutatingWebhookConfiguration) {
    if entry.local_name() != SIDECAR_INJECTOR_WEBHOOK {
        return;
    }
    let first = match config.webhooks.as_deref().and_then(|w| w.first()) {
        Some(w) => w,
        None => {
            debug!(name = %entry.name, "webhook configuration has no webhooks; skipping");
            return;
        }
    };
    let labels = first.namespace_selector.as_ref().and_then(|s| s.match_labels.as_ref());
    for (key, value) in labels.into_iter().flatten() {
        ctx.report(Kind::MutatingWebhookConfiguration, msg::internal_error(entry, format!("{}:{}", key, value)));
    }
}
