use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lotus_operator::health::{HealthState, run_health_server};
use lotus_operator::resources::DEFAULT_LOTUS_IMAGE;
use lotus_operator::{Config, ControllerSettings, run_controller};

/// Lease configuration
const LEASE_NAME: &str = "lotus-controller-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

/// Kubernetes controller running Lotus load tests
#[derive(Parser, Debug)]
#[command(name = "lotus-operator", version, about, long_about = None)]
struct Args {
    /// Namespace the controller runs in; release-wide resources are created here
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Namespace to watch for Lotus resources, defaults to --namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Release name prefixing the release-wide resources
    #[arg(long, env = "LOTUS_RELEASE", default_value = "lotus")]
    release: String,

    /// Static configuration file
    #[arg(long, env = "LOTUS_CONFIG_FILE")]
    config_file: PathBuf,

    /// Service account of the per-test Prometheus pods
    #[arg(long, env = "LOTUS_PROMETHEUS_SERVICE_ACCOUNT")]
    prometheus_service_account: Option<String>,

    /// Deployment running this controller, owner of the release-wide resources
    #[arg(long, env = "LOTUS_CONTROLLER_DEPLOYMENT", default_value = "lotus-controller")]
    controller_deployment: String,

    /// Image running the monitor
    #[arg(long, env = "LOTUS_IMAGE", default_value = DEFAULT_LOTUS_IMAGE)]
    lotus_image: String,

    /// Number of concurrent reconciliation workers
    #[arg(long, env = "LOTUS_WORKERS", default_value_t = 2)]
    workers: usize,

    /// Kubeconfig context, in-cluster config when unset
    #[arg(long)]
    kube_context: Option<String>,

    /// Port of the health and metrics server
    #[arg(long, env = "LOTUS_HEALTH_PORT", default_value_t = 8080)]
    health_port: u16,
}

impl Args {
    fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            namespace: self.namespace.clone(),
            watch_namespace: self.watch_namespace.clone(),
            release: self.release.clone(),
            config_file: self.config_file.clone(),
            prometheus_service_account: self.prometheus_service_account.clone(),
            controller_deployment: self.controller_deployment.clone(),
            lotus_image: self.lotus_image.clone(),
            workers: self.workers,
        }
    }
}

async fn kube_client(context: Option<&str>) -> Result<Client, Box<dyn std::error::Error>> {
    let Some(context) = context else {
        return Ok(Client::try_default().await?);
    };
    let kubeconfig = Kubeconfig::read()?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    Ok(Client::try_from(config)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err(
            "Failed to install rustls crypto provider and no provider is available".into(),
        );
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lotus_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting lotus-operator");

    // Fail fast on a broken static config; the controller reloads it per test
    Config::from_file(&args.config_file)?;

    let client = kube_client(args.kube_context.as_deref()).await?;
    info!("Connected to Kubernetes cluster");

    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    info!(
        holder_id = %pod_name,
        namespace = %args.namespace,
        lease_name = LEASE_NAME,
        "Initializing leader election"
    );

    let health_state = Arc::new(HealthState::new());

    // Probes are served even while not leading
    let health_handle = {
        let health_state = health_state.clone();
        let port = args.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_params = || LeaseLockParams {
        holder_id: pod_name.clone(),
        lease_name: LEASE_NAME.to_string(),
        lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
    };
    let lease_lock = LeaseLock::new(client.clone(), &args.namespace, lease_params());

    info!("Waiting to acquire leadership...");
    loop {
        tokio::select! {
            result = lease_lock.try_acquire_or_renew() => match result {
                Ok(result) if result.acquired_lease => {
                    info!("Acquired leadership");
                    break;
                }
                Ok(_) => info!("Another instance is leader, waiting..."),
                Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
            },
            _ = shutdown_signal() => {
                info!("Received shutdown signal before acquiring leadership");
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    let lease_renewal_handle = {
        let lease_lock = LeaseLock::new(client.clone(), &args.namespace, lease_params());
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;

                match lease_lock.try_acquire_or_renew().await {
                    Ok(result) if result.acquired_lease => {}
                    Ok(_) => {
                        error!("Lost leadership! Shutting down...");
                        // Exit so Kubernetes restarts us and we re-enter election
                        std::process::exit(1);
                    }
                    Err(e) => {
                        error!("Failed to renew lease: {}. Shutting down...", e);
                        std::process::exit(1);
                    }
                }
            }
        })
    };

    let token = CancellationToken::new();
    let mut controller_handle = {
        let health_state = health_state.clone();
        let settings = args.settings();
        let token = token.clone();
        tokio::spawn(async move { run_controller(client, settings, Some(health_state), token).await })
    };

    tokio::select! {
        result = &mut controller_handle => {
            match result {
                Ok(Ok(())) => info!("Controller exited"),
                Ok(Err(e)) => {
                    error!("Controller failed: {}", e);
                    return Err(e.into());
                }
                Err(e) => error!("Controller task panicked: {}", e),
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Lease renewal only exits via process::exit() or panic
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            token.cancel();

            match tokio::time::timeout(
                Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS),
                &mut controller_handle,
            )
            .await
            {
                Ok(Ok(Err(e))) => error!("Controller failed during shutdown: {}", e),
                Ok(_) => info!("In-flight reconciliations drained"),
                Err(_) => warn!(
                    "Controller did not stop within {}s, exiting anyway",
                    SHUTDOWN_GRACE_PERIOD_SECS
                ),
            }
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
