//! credential-rotator - keeps LLM gateway cloud credentials fresh
//!
//! Exchanges workload identity for short-lived AWS, Azure and GCP
//! credentials and stores them as Kubernetes secrets.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use credential_rotator::{
    cli::{Cli, Command, parse_policy_ref},
    config::{Config, StoreBackend},
    rotator::{CredentialRotator, Rotator, RotatorDeps, build_rotator},
    schedule::Scheduler,
    setup_tracing,
    store::{InMemorySecretStore, KubeSecretStore, SecretStore},
    transport::{ProxyConfig, Transports},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // env_files are applied during load, so proxies are read afterwards
    let config = match Config::load(cli.config.as_deref()).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Validate) => run_validate(&config),
        Some(Command::Status) => run_status(config).await,
        Some(Command::Rotate { policy }) => run_rotate(config, &policy).await,
        Some(Command::Run) | None => run_rotator(config).await,
    }
}

/// Validate command
fn run_validate(config: &Config) -> ExitCode {
    println!("✅ Configuration valid");
    println!("   Policies: {}", config.policies.len());
    for policy in &config.policies {
        println!(
            "   - {}/{} ({})",
            policy.namespace,
            policy.name,
            policy.provider.kind()
        );
    }
    ExitCode::SUCCESS
}

async fn build_deps(config: &Config) -> Option<RotatorDeps> {
    let store: Arc<dyn SecretStore> = match config.store.backend {
        StoreBackend::Kubernetes => match KubeSecretStore::try_default().await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to create Kubernetes client: {e}");
                return None;
            }
        },
        StoreBackend::Memory => {
            warn!("Using in-memory secret store; credentials are not persisted");
            Arc::new(InMemorySecretStore::new())
        }
    };

    let proxies = ProxyConfig::from_env();
    let transports = Arc::new(Transports::new(&proxies, config.http_timeout));

    Some(RotatorDeps::new(
        store,
        transports,
        config.endpoints.clone(),
        config.pre_rotation_window,
    ))
}

fn build_rotators(config: &Config, deps: &RotatorDeps) -> Option<Vec<CredentialRotator>> {
    let mut rotators = Vec::with_capacity(config.policies.len());
    for policy in &config.policies {
        match build_rotator(policy, deps) {
            Ok(Some(rotator)) => rotators.push(rotator),
            Ok(None) => {}
            Err(e) => {
                error!(
                    namespace = %policy.namespace,
                    policy = %policy.name,
                    "Failed to build rotator: {e}"
                );
                return None;
            }
        }
    }
    Some(rotators)
}

/// Rotate one policy now
async fn run_rotate(config: Config, reference: &str) -> ExitCode {
    let (namespace, name) = match parse_policy_ref(reference) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    let Some(policy) = config.policy(namespace, name) else {
        eprintln!("❌ No policy {namespace}/{name} in configuration");
        return ExitCode::FAILURE;
    };
    let Some(deps) = build_deps(&config).await else {
        return ExitCode::FAILURE;
    };

    let rotator = match build_rotator(policy, &deps) {
        Ok(Some(rotator)) => rotator,
        Ok(None) => {
            println!("{namespace}/{name} uses a static API key; nothing to rotate");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match rotator.rotate().await {
        Ok(expires_at) => {
            println!("✅ Rotated {namespace}/{name}, expires {expires_at}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Rotation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print rotation status for every policy
async fn run_status(config: Config) -> ExitCode {
    let Some(deps) = build_deps(&config).await else {
        return ExitCode::FAILURE;
    };
    let Some(rotators) = build_rotators(&config, &deps) else {
        return ExitCode::FAILURE;
    };

    let window = chrono::TimeDelta::from_std(config.pre_rotation_window).unwrap_or_default();
    let expiry = |t: chrono::DateTime<chrono::Utc>| {
        t.checked_add_signed(window)
            .map_or_else(|| "unknown".to_string(), |e| e.to_string())
    };
    let mut healthy = true;
    for rotator in &rotators {
        let label = format!(
            "{}/{} ({})",
            rotator.namespace(),
            rotator.policy_name(),
            rotator.provider()
        );
        match rotator.pre_rotation_time().await {
            Ok(t) if t == credential_rotator::rotator::NO_SECRET => {
                println!("⚠️  {label}: no secret yet");
            }
            Ok(t) if rotator.is_expired(t) => {
                println!("⚠️  {label}: due for rotation since {t} (expires {})", expiry(t));
            }
            Ok(t) => println!("✅ {label}: next rotation at {t} (expires {})", expiry(t)),
            Err(e) => {
                healthy = false;
                println!("❌ {label}: {e}");
            }
        }
    }

    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run the rotation loop until interrupted
async fn run_rotator(config: Config) -> ExitCode {
    let Some(deps) = build_deps(&config).await else {
        return ExitCode::FAILURE;
    };
    let Some(rotators) = build_rotators(&config, &deps) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        policies = config.policies.len(),
        rotated = rotators.len(),
        pre_rotation_window_secs = config.pre_rotation_window.as_secs(),
        "Starting credential rotator"
    );

    let rotators: Vec<Arc<dyn Rotator>> = rotators
        .into_iter()
        .map(|r| Arc::new(r) as Arc<dyn Rotator>)
        .collect();
    let scheduler = Scheduler::new(rotators, config.pre_rotation_window, config.failure_requeue);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    scheduler.run(shutdown).await;

    info!("Credential rotator shutdown complete");
    ExitCode::SUCCESS
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
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
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
