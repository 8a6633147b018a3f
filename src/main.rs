use std::future::Future;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use uuid::Uuid;

use cgroup_enhancer::cgroups::HostCgroups;
use cgroup_enhancer::config::Args;
use cgroup_enhancer::controller::Controller;
use cgroup_enhancer::kube::{KubeClient, LeaderElector};
use cgroup_enhancer::probes;
use cgroup_enhancer::reconcile::{Enforcer, Reconciler};
use cgroup_enhancer::runtime::ContainerdConnector;
use cgroup_enhancer::security;
use cgroup_enhancer::tracing::{init_tracing, shutdown_tracing};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!(error = %e, "cgroup-enhancer exited with error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BoxError> {
    init_tracing("cgroup-enhancer", args.log_json, args.otlp_endpoint.as_deref())?;

    let config = args.enhancer_config();
    info!(
        node = %args.node_name,
        annotation = %config.annotation_key,
        socket = %config.containerd_socket.display(),
        cgroup_root = %config.cgroup_root.display(),
        "Starting cgroup-enhancer"
    );

    match security::preflight() {
        Ok(report) if report.is_complete() => {
            info!(effective = report.effective.len(), "Capability preflight passed")
        }
        Ok(report) => warn!(
            missing = ?report.missing,
            "Missing capabilities; cgroup writes will fail"
        ),
        Err(e) => warn!(error = %e, "Could not read process capabilities"),
    }

    let client = Arc::new(match &args.kube_api_url {
        Some(url) => KubeClient::new(url.clone()),
        None => KubeClient::in_cluster()?,
    });
    info!(api = client.base_url(), "Kubernetes client ready");

    spawn_server("health", probes::serve("health", args.health_probe_bind_address, probes::health_router()));
    spawn_server("metrics", probes::serve("metrics", args.metrics_bind_address, probes::metrics_router()));
    spawn_server("debug", probes::serve("debug", args.pprof_bind_address, probes::debug_router()));

    let elector = if args.leader_elect {
        let identity = format!("{}_{}", args.node_name, Uuid::now_v7());
        let elector = LeaderElector::new(
            Arc::clone(&client),
            args.leader_election_namespace.clone(),
            args.leader_election_id.clone(),
            identity,
        );
        elector.acquire().await;
        Some(elector)
    } else {
        None
    };

    let enforcer = Arc::new(Enforcer::new(
        Arc::new(ContainerdConnector::new(config.containerd_socket.clone())),
        Arc::new(HostCgroups::new(config.proc_root.clone(), config.cgroup_root.clone())),
        &config,
    ));
    let reconciler = Arc::new(Reconciler::new(client.clone(), enforcer, &config));
    let controller = Controller::new(Arc::clone(&client), reconciler, &args.node_name);

    let leadership = async {
        match &elector {
            Some(elector) => elector.hold().await,
            None => std::future::pending().await,
        }
    };

    let result: Result<(), BoxError> = tokio::select! {
        _ = controller.run() => Err("pod controller stopped".into()),
        lost = leadership => Err(lost.into()),
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    if args.otlp_endpoint.is_some() {
        shutdown_tracing();
    }

    result
}

/// Run an HTTP server in the background, logging if it stops
fn spawn_server<F>(name: &'static str, server: F)
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(server = name, error = %e, "HTTP server failed");
        }
    });
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
