use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use meshcheck_analysis::{analyzers, Report, Settings, Suppression};
use meshcheck_core::msg::Level;
use meshcheck_store::{LoadIssue, SnapshotBuilder};
use tracing::{error, info, warn};

/// Exit status when a reported message reaches the failure threshold.
const EXIT_FINDINGS: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "meshcheckctl", version, about = "Find dangling references in mesh configuration")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for manifests that omit one; also scopes cluster listing
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze manifests (files, directories, or "-" for stdin) and/or the live cluster
    Analyze {
        paths: Vec<PathBuf>,
        /// Also load the analyzed kinds from the current kube context
        #[arg(long = "cluster", action = ArgAction::SetTrue)]
        cluster: bool,
        /// Analyzer to skip (repeatable)
        #[arg(long = "disable")]
        disable: Vec<String>,
        /// Minimum level to report: info, warning or error
        #[arg(long = "level")]
        level: Option<Level>,
        /// Silence a message, e.g. "MC0101=VirtualService default/vs1" or "MC0001=*" (repeatable)
        #[arg(long = "suppress")]
        suppress: Vec<Suppression>,
        /// Exit non-zero when a message at or above this level is reported
        #[arg(long = "failure-threshold", default_value = "error")]
        failure_threshold: Level,
    },
    /// List the registered analyzers
    Analyzers,
}

fn init_tracing() {
    let env = std::env::var("MESHCHECK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn metrics_addr(raw: &str) -> Option<SocketAddr> {
    raw.trim().parse().ok()
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MESHCHECK_METRICS_ADDR") {
        match metrics_addr(&addr) {
            Some(sock) => match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
                Ok(()) => info!(addr = %sock, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            },
            None => warn!(addr = %addr, "invalid MESHCHECK_METRICS_ADDR; expected host:port"),
        }
    }
}

fn is_manifest(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml" | "json"))
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut children = std::fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading entry in {}", dir.display()))?;
    children.sort();
    for child in children {
        if child.is_dir() {
            walk(&child, out)?;
        } else if is_manifest(&child) {
            out.push(child);
        }
    }
    Ok(())
}

/// Expand directories recursively into manifest files, sorted for stable load order.
fn collect_sources(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in paths {
        if p.as_os_str() == "-" || !p.is_dir() {
            out.push(p.clone());
        } else {
            walk(p, &mut out)?;
        }
    }
    Ok(out)
}

fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn settings_from(disable: Vec<String>, level: Option<Level>, suppress: Vec<Suppression>) -> Settings {
    let mut settings = Settings::from_env();
    settings.disabled.extend(disable);
    if let Some(l) = level {
        settings.min_level = l;
    }
    settings.suppressions.extend(suppress);
    settings
}

fn print_report(output: Output, report: &Report, issues: &[LoadIssue]) -> Result<()> {
    match output {
        Output::Human => {
            for issue in issues {
                eprintln!("warning: skipped {}", issue);
            }
            if report.messages.is_empty() {
                println!("No validation issues found ({} analyzer(s) ran).", report.executed.len());
            }
            for m in &report.messages {
                println!("{}", m);
            }
        }
        Output::Json => {
            #[derive(serde::Serialize)]
            struct Row<'a> { code: &'a str, level: Level, origin: String, message: String, params: &'a [String] }
            #[derive(serde::Serialize)]
            struct Out<'a> { messages: Vec<Row<'a>>, issues: &'a [LoadIssue], executed: &'a [&'static str], skipped: &'a [&'static str], filtered: usize }
            let rows = report
                .messages
                .iter()
                .map(|m| Row { code: m.code(), level: m.level(), origin: m.origin.to_string(), message: m.render(), params: &m.params })
                .collect();
            let out = Out { messages: rows, issues, executed: &report.executed, skipped: &report.skipped, filtered: report.filtered };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { paths, cluster, disable, level, suppress, failure_threshold } => {
            let default_ns = cli.namespace.clone().unwrap_or_else(|| "default".to_string());
            info!(paths = paths.len(), cluster, ns = %default_ns, "analyze invoked");
            if paths.is_empty() && !cluster {
                anyhow::bail!("nothing to analyze: pass manifest paths and/or --cluster");
            }
            let mut builder = SnapshotBuilder::new(default_ns);
            for src in collect_sources(&paths)? {
                let text = read_source(&src)?;
                builder.push_yaml(&text, &src.display().to_string());
            }
            if cluster {
                if let Err(e) = meshcheck_kubehub::load_into(&mut builder, cli.namespace.as_deref()).await {
                    error!(error = ?e, "cluster load failed");
                    return Err(e);
                }
            }
            let snap = builder.freeze();
            let settings = settings_from(disable, level, suppress);
            let report = meshcheck_analysis::run(&snap, &analyzers::all(), &settings);
            print_report(cli.output, &report, builder.issues())?;
            if report.has_at_least(failure_threshold) {
                warn!(threshold = %failure_threshold, "findings at or above failure threshold");
                std::process::exit(EXIT_FINDINGS);
            }
        }
        Commands::Analyzers => {
            let metas: Vec<_> = analyzers::all().iter().map(|a| a.metadata()).collect();
            match cli.output {
                Output::Human => {
                    for m in metas {
                        let inputs: Vec<_> = m.inputs.iter().map(|k| k.gvk_key()).collect();
                        println!("{}", m.name);
                        println!("    {}", m.description);
                        println!("    inputs: {}", inputs.join(", "));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&metas)?),
            }
        }
    }

    Ok(())
}
