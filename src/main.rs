use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use pod_relocator::{
    config::RelocatorConfig,
    k8s::{ClusterApi, K8sClient, PodFilter},
    relocation::{schedulable_names, Outcome, Relocator},
};

mod cli;

use cli::{format_pod, Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let fmt_layer = if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(fmt_layer)
        .init();

    let config = cli.apply(RelocatorConfig::load()?);
    tracing::debug!(?config, "Configuration loaded");

    let client = K8sClient::connect(&cli.connection())
        .await
        .context("failed to connect to the cluster")?;

    match &cli.command {
        Command::ListPods {
            all_namespaces,
            on_node,
        } => {
            let namespace = if *all_namespaces { "" } else { config.namespace.as_str() };
            let filter = match on_node {
                Some(node) => PodFilter::default().fields(format!("spec.nodeName={}", node)),
                None => PodFilter::default(),
            };
            let pods = client
                .list_pods(namespace, &filter)
                .await
                .context("failed to list pods")?;
            for pod in &pods {
                println!("{}", format_pod(pod));
            }
            return Ok(());
        }
        Command::ListNodes => {
            let nodes = client.list_nodes().await.context("failed to list nodes")?;
            for name in schedulable_names(&nodes) {
                println!("{}", name);
            }
            return Ok(());
        }
        _ => {}
    }

    let Some(intent) = cli.intent(&config) else {
        return Ok(());
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, abandoning wait");
            on_signal.cancel();
        }
    });

    let description = format!("{} of {}", intent.strategy, intent.target);
    let mut relocator = Relocator::new(client, config).with_cancellation(cancel);
    let outcome = relocator
        .relocate(intent)
        .await
        .with_context(|| format!("{} failed", description))?;

    report(&outcome, cli.json)?;
    if outcome.is_failed() {
        bail!("relocation did not converge: {}", outcome);
    }
    Ok(())
}

fn report(outcome: &Outcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else {
        println!("{}", outcome);
    }
    Ok(())
}
