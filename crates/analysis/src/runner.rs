//! Runs a set of analyzers over one snapshot and applies output settings.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use meshcheck_core::msg::{Level, Message};
use meshcheck_store::Snapshot;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{Analyzer, SnapshotContext};

/// Silences one message code for one resource (`Kind ns/name`), or for any resource with `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suppression {
    pub code: String,
    pub resource: String,
}

impl Suppression {
    pub fn matches(&self, m: &Message) -> bool {
        if self.code != m.code() {
            return false;
        }
        self.resource == "*" || self.resource == m.origin.to_string()
    }
}

impl FromStr for Suppression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, resource) = s
            .split_once('=')
            .ok_or_else(|| format!("invalid suppression {:?} (expected CODE=Kind ns/name)", s))?;
        let (code, resource) = (code.trim(), resource.trim());
        if code.is_empty() || resource.is_empty() {
            return Err(format!("invalid suppression {:?} (empty code or resource)", s));
        }
        Ok(Self { code: code.to_string(), resource: resource.to_string() })
    }
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.code, self.resource)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Analyzer names that will not run.
    pub disabled: Vec<String>,
    /// Messages below this level are dropped from the report.
    pub min_level: Level,
    pub suppressions: Vec<Suppression>,
}

impl Default for Settings {
    fn default() -> Self {
        Self { disabled: Vec::new(), min_level: Level::Info, suppressions: Vec::new() }
    }
}

impl Settings {
    /// Read `MESHCHECK_DISABLE`, `MESHCHECK_MIN_LEVEL` and `MESHCHECK_SUPPRESS` (comma separated lists).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut s = Self::default();
        if let Some(v) = var("MESHCHECK_DISABLE") {
            s.disabled = split_list(&v).map(str::to_string).collect();
        }
        if let Some(v) = var("MESHCHECK_MIN_LEVEL") {
            match v.trim().parse::<Level>() {
                Ok(l) => s.min_level = l,
                Err(e) => warn!(error = %e, "ignoring MESHCHECK_MIN_LEVEL"),
            }
        }
        if let Some(v) = var("MESHCHECK_SUPPRESS") {
            for item in split_list(&v) {
                match item.parse::<Suppression>() {
                    Ok(sup) => s.suppressions.push(sup),
                    Err(e) => warn!(error = %e, "ignoring MESHCHECK_SUPPRESS entry"),
                }
            }
        }
        s
    }

    pub fn is_disabled(&self, analyzer: &str) -> bool {
        self.disabled.iter().any(|d| d == analyzer)
    }

    fn is_suppressed(&self, m: &Message) -> bool {
        self.suppressions.iter().any(|s| s.matches(m))
    }
}

fn split_list(v: &str) -> impl Iterator<Item = &str> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub messages: Vec<Message>,
    /// Analyzers that ran, in order.
    pub executed: Vec<&'static str>,
    /// Analyzers skipped because they were disabled.
    pub skipped: Vec<&'static str>,
    /// Messages dropped by level or suppression.
    pub filtered: usize,
}

impl Report {
    pub fn has_at_least(&self, level: Level) -> bool {
        self.messages.iter().any(|m| m.level() >= level)
    }
}

/// Run each enabled analyzer in its own context over `snapshot`.
pub fn run(snapshot: &Snapshot, analyzers: &[Box<dyn Analyzer>], settings: &Settings) -> Report {
    let t0 = Instant::now();
    counter!("analysis_runs_total", 1u64);
    let mut report = Report::default();
    for analyzer in analyzers {
        let name = analyzer.name();
        if settings.is_disabled(name) {
            debug!(analyzer = name, "analyzer disabled");
            report.skipped.push(name);
            continue;
        }
        let started = Instant::now();
        let ctx = SnapshotContext::new(snapshot);
        analyzer.analyze(&ctx);
        let messages = ctx.into_messages();
        histogram!("analysis_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "analyzer" => name);
        counter!("analysis_messages_total", messages.len() as u64, "analyzer" => name);
        debug!(analyzer = name, messages = messages.len(), "analyzer finished");
        report.executed.push(name);
        for m in messages {
            if m.level() < settings.min_level || settings.is_suppressed(&m) {
                report.filtered += 1;
            } else {
                report.messages.push(m);
            }
        }
    }
    info!(
        entries = snapshot.len(),
        analyzers = report.executed.len(),
        messages = report.messages.len(),
        filtered = report.filtered,
        took_ms = t0.elapsed().as_millis() as u64,
        "analysis complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_parsing() {
        let s: Suppression = "MC0101=VirtualService default/vs1".parse().unwrap();
        assert_eq!(s.code, "MC0101");
        assert_eq!(s.resource, "VirtualService default/vs1");
        assert_eq!(s.to_string(), "MC0101=VirtualService default/vs1");
        assert!("MC0101".parse::<Suppression>().is_err());
        assert!("=*".parse::<Suppression>().is_err());
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn env_settings_parse_each_variable() {
        let s = Settings::from_lookup(lookup(&[
            ("MESHCHECK_DISABLE", "virtualservice.GatewayAnalyzer, other.Analyzer"),
            ("MESHCHECK_MIN_LEVEL", "warning"),
            ("MESHCHECK_SUPPRESS", "MC0001=*,MC0101=VirtualService default/vs1"),
        ]));
        assert_eq!(s.disabled, vec!["virtualservice.GatewayAnalyzer", "other.Analyzer"]);
        assert!(s.is_disabled("other.Analyzer"));
        assert_eq!(s.min_level, Level::Warning);
        assert_eq!(s.suppressions.len(), 2);
        assert_eq!(s.suppressions[1].resource, "VirtualService default/vs1");
    }

    #[test]
    fn env_settings_ignore_bad_values() {
        let s = Settings::from_lookup(lookup(&[
            ("MESHCHECK_MIN_LEVEL", "loud"),
            ("MESHCHECK_SUPPRESS", "MC0101,MC0001=*,=x"),
        ]));
        assert_eq!(s.min_level, Level::Info);
        assert!(s.disabled.is_empty());
        assert_eq!(s.suppressions, vec![Suppression { code: "MC0001".into(), resource: "*".into() }]);

        let unset = Settings::from_lookup(|_| None);
        assert_eq!(unset.min_level, Level::Info);
        assert!(unset.suppressions.is_empty());
    }

    #[test]
    fn list_splitting_ignores_blanks() {
        let v: Vec<_> = split_list(" a, ,b ,").collect();
        assert_eq!(v, vec!["a", "b"]);
    }
}
