#![forbid(unsafe_code)]

use std::sync::Arc;

use meshcheck_analysis::{analyzers, run, Analyzer, AnalyzerMetadata, Context, Settings, Suppression};
use meshcheck_core::msg::{self, Level};
use meshcheck_core::Kind;
use meshcheck_store::{Snapshot, SnapshotBuilder};

fn snapshot() -> Arc<Snapshot> {
    let yaml = r#"
apiVersion: networking.istio.io/v1alpha3
kind: VirtualService
metadata:
  name: vs1
  namespace: default
spec:
  gateways: ["gw1", "other-ns/gw2"]
---
apiVersion: networking.istio.io/v1alpha3
kind: Gateway
metadata:
  name: gw1
  namespace: default
spec:
  selector: { istio: ingressgateway }
---
apiVersion: v1
kind: Pod
metadata:
  name: p1
  namespace: default
spec:
  initContainers: [{ name: init, image: busybox }]
  containers: [{ name: app, image: nginx }]
"#;
    let mut b = SnapshotBuilder::new("default");
    b.push_yaml(yaml, "inline");
    b.freeze()
}

/// Flags every pod with an informational message.
struct PodCounter;

impl Analyzer for PodCounter {
    fn metadata(&self) -> AnalyzerMetadata {
        AnalyzerMetadata { name: "test.PodCounter", description: "counts pods", inputs: &[Kind::Pod] }
    }

    fn analyze(&self, ctx: &dyn Context) {
        static SEEN: msg::MessageType = msg::MessageType { code: "MC9999", level: Level::Info, template: "seen {0}" };
        for e in ctx.entries(Kind::Pod) {
            ctx.report(Kind::Pod, msg::Message::new(&SEEN, e, smallvec::smallvec![e.local_name().to_string()]));
        }
    }
}

#[test]
fn default_settings_run_everything() {
    let snap = snapshot();
    let report = run(&snap, &analyzers::all(), &Settings::default());
    assert_eq!(report.executed, vec!["virtualservice.GatewayAnalyzer"]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.messages.len(), 2);
    assert_eq!(report.filtered, 0);
    assert!(report.has_at_least(Level::Error));
}

#[test]
fn disabled_analyzers_are_skipped() {
    let snap = snapshot();
    let settings = Settings { disabled: vec!["virtualservice.GatewayAnalyzer".into()], ..Settings::default() };
    let report = run(&snap, &analyzers::all(), &settings);
    assert!(report.executed.is_empty());
    assert_eq!(report.skipped, vec!["virtualservice.GatewayAnalyzer"]);
    assert!(report.messages.is_empty());
    assert!(!report.has_at_least(Level::Info));
}

#[test]
fn suppressions_match_code_and_resource() {
    let snap = snapshot();
    let settings = Settings {
        suppressions: vec!["MC0101=VirtualService default/vs1".parse::<Suppression>().unwrap()],
        ..Settings::default()
    };
    let report = run(&snap, &analyzers::all(), &settings);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].code(), "MC0001");
    assert_eq!(report.filtered, 1);

    let wildcard = Settings { suppressions: vec!["MC0001=*".parse().unwrap()], ..Settings::default() };
    let report = run(&snap, &analyzers::all(), &wildcard);
    assert_eq!(report.messages.len(), 1);
    assert_eq!(report.messages[0].code(), "MC0101");
}

#[test]
fn min_level_drops_lower_severity() {
    let snap = snapshot();
    let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(PodCounter), Box::new(analyzers::virtualservice::GatewayAnalyzer)];

    let report = run(&snap, &analyzers, &Settings::default());
    assert_eq!(report.executed, vec!["test.PodCounter", "virtualservice.GatewayAnalyzer"]);
    assert_eq!(report.messages.len(), 3);
    assert_eq!(report.messages[0].render(), "seen p1");

    let strict = Settings { min_level: Level::Warning, ..Settings::default() };
    let report = run(&snap, &analyzers, &strict);
    assert_eq!(report.messages.len(), 2);
    assert_eq!(report.filtered, 1);
    assert!(report.messages.iter().all(|m| m.level() == Level::Error));
}
