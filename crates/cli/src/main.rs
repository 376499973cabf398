use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gantry_converge::{expected_deployments, wait_for_deployments, wait_for_removal, ConvergenceResult, ErrorPolicy, PollConfig};
use gantry_core::ResourceKind;
use gantry_kubehub::KubeQuery;
use gantry_mutate::{knative, MutationPipeline, MutationRequest};
use kube::core::{admission::AdmissionReview, DynamicObject};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod manifest;

#[derive(Parser, Debug)]
#[command(name = "gantryctl", version, about = "Gantry CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(clap::Args, Debug, Clone)]
struct PollArgs {
    /// Seconds between evaluations (default: GANTRY_POLL_INTERVAL_SECS or 10)
    #[arg(long = "interval")]
    interval_secs: Option<u64>,
    /// Overall deadline in seconds (default: GANTRY_POLL_TIMEOUT_SECS or 300)
    #[arg(long = "timeout")]
    timeout_secs: Option<u64>,
}

impl PollArgs {
    fn config(&self) -> PollConfig {
        let env = PollConfig::from_env();
        PollConfig::new(
            self.interval_secs.map(Duration::from_secs).unwrap_or(env.interval),
            self.timeout_secs.map(Duration::from_secs).unwrap_or(env.timeout),
        )
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the JSON Patch the registered mutations would produce for an object
    Mutate {
        /// GVK key, e.g. "operator.serverless.openshift.io/v1alpha1/KnativeKafka" (default: from the object)
        #[arg(long = "kind")]
        kind: Option<String>,
        /// JSON or YAML file holding one object
        file: PathBuf,
    },
    /// Run an AdmissionReview (JSON) through the admission adapter and print the response
    Review {
        file: PathBuf,
    },
    /// List kinds with registered mutation chains
    Kinds,
    /// Wait until the named deployments are available at a version
    WaitReady {
        #[arg(long = "ns")]
        namespace: String,
        /// Target version; workloads must carry the label value "v<version>"
        #[arg(long = "version")]
        version: String,
        /// Deployment names; with --manifest, added to the manifest's deployments
        names: Vec<String>,
        /// Manifest whose Deployments are expected
        #[arg(long = "manifest")]
        manifest: Option<PathBuf>,
        #[command(flatten)]
        poll: PollArgs,
    },
    /// Wait until resources from an obsolete manifest are gone
    WaitGone {
        #[arg(long = "ns")]
        namespace: String,
        /// Fail on lookup errors instead of treating the resource as present
        #[arg(long = "strict", action = ArgAction::SetTrue)]
        strict: bool,
        manifest: PathBuf,
        #[command(flatten)]
        poll: PollArgs,
    },
}

fn init_tracing() {
    let env = std::env::var("GANTRY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GANTRY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid GANTRY_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Cancel `token` on Ctrl-C so waits stop promptly.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            token.cancel();
        }
    });
}

fn report(output: Output, what: &str, res: &ConvergenceResult) -> Result<()> {
    match output {
        Output::Human => println!("{}: {}", what, res),
        Output::Json => {
            let v = match res {
                ConvergenceResult::Converged { attempts, elapsed } => serde_json::json!({
                    "status": "converged", "attempts": attempts, "elapsed_ms": elapsed.as_millis() as u64,
                }),
                ConvergenceResult::TimedOut { attempts, elapsed, last } => serde_json::json!({
                    "status": "timed_out", "attempts": attempts, "elapsed_ms": elapsed.as_millis() as u64, "last": last,
                }),
                ConvergenceResult::Failed(e) => serde_json::json!({ "status": "failed", "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
    }
    if res.is_converged() { Ok(()) } else { Err(anyhow!("{}: {}", what, res)) }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let pipeline = MutationPipeline::new(Arc::new(knative::default_registry()));

    match cli.command {
        Commands::Kinds => {
            let kinds = pipeline.registry().kinds();
            match cli.output {
                Output::Human => {
                    for k in &kinds {
                        let steps = pipeline.registry().resolve(k).map(|c| c.step_names().join(", ")).unwrap_or_default();
                        println!("{} • {}", k, steps);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&kinds)?),
            }
        }
        Commands::Mutate { kind, file } => {
            let (raw, inferred) = manifest::single_object(&read_file(&file)?)?;
            let kind = match kind {
                Some(key) => ResourceKind::parse(&key)?,
                None => inferred,
            };
            info!(kind = %kind, file = %file.display(), "mutate invoked");
            let patch = pipeline.mutate(&MutationRequest::new(raw, kind)).map_err(|e| {
                error!(error = %e, code = e.status_code(), "mutation failed");
                anyhow!("mutation failed ({}): {}", e.status_code(), e)
            })?;
            match cli.output {
                Output::Human => {
                    let s = patch.summary();
                    println!("ops: {} (+{} ~{} -{})", patch.len(), s.adds, s.updates, s.removes);
                    for op in patch.operations() {
                        println!("{}", serde_json::to_string(op)?);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&patch.to_json())?),
            }
        }
        Commands::Review { file } => {
            let text = read_file(&file)?;
            let review: AdmissionReview<DynamicObject> =
                serde_json::from_str(&text).with_context(|| format!("parsing AdmissionReview from {}", file.display()))?;
            let out = gantry_mutate::review::review(&pipeline, review);
            let v = serde_json::to_value(&out)?;
            match cli.output {
                Output::Human => {
                    let resp = &v["response"];
                    let allowed = resp["allowed"].as_bool().unwrap_or(false);
                    println!("uid: {}", resp["uid"].as_str().unwrap_or(""));
                    println!("allowed: {}", allowed);
                    if let Some(msg) = resp.pointer("/status/message").and_then(|m| m.as_str()) {
                        println!("message: {}", msg);
                    }
                    if resp.get("patch").is_some() {
                        println!("patchType: {}", resp["patchType"].as_str().unwrap_or(""));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&v)?),
            }
        }
        Commands::WaitReady { namespace, version, names, manifest: manifest_path, poll } => {
            let mut expected = match &manifest_path {
                Some(p) => expected_deployments(&manifest::descriptors(&read_file(p)?)?),
                None => Vec::new(),
            };
            for n in names {
                if !expected.contains(&n) {
                    expected.push(n);
                }
            }
            if expected.is_empty() {
                return Err(anyhow!("no deployments to wait for; pass names or --manifest"));
            }
            let cfg = poll.config();
            info!(ns = %namespace, version = %version, count = expected.len(), ?cfg, "wait-ready invoked");
            let query = KubeQuery::try_default().await?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let res = wait_for_deployments(&query, &namespace, &expected, &version, &cfg, &cancel).await;
            report(cli.output, "wait-ready", &res)?;
        }
        Commands::WaitGone { namespace, strict, manifest: manifest_path, poll } => {
            let candidates = manifest::descriptors(&read_file(&manifest_path)?)?;
            let policy = if strict { ErrorPolicy::Strict } else { ErrorPolicy::Lenient };
            let cfg = poll.config();
            info!(ns = %namespace, count = candidates.len(), ?policy, ?cfg, "wait-gone invoked");
            let query = KubeQuery::try_default().await?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            let res = wait_for_removal(&query, &namespace, &candidates, policy, &cfg, &cancel).await;
            report(cli.output, "wait-gone", &res)?;
        }
    }
    Ok(())
}
