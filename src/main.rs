//! Fleetbench daemon entry point: a thin binary that wires the Supervisor,
//! the two tick loops, and the optional Web Session Gateway together.
//! Flag parsing, the TUI, and static asset serving live outside the core
//! and are not this binary's concern beyond the knobs in
//! `fleetbench::config::StartOptions`.

use fleetbench::config::{Paths, StartOptions, SupervisorConfig};
use fleetbench::gateway::{ws, TerminalMonitor};
use fleetbench::supervisor::Supervisor;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fleetbench=info".parse().unwrap()),
        )
        .init();

    let paths = Paths::new();
    if let Err(e) = paths.ensure_root() {
        error!(error = %e, "failed to initialize data directory");
        std::process::exit(1);
    }

    let pid_file = paths.daemon_pid_file();
    std::fs::write(&pid_file, std::process::id().to_string())?;

    let supervisor = Arc::new(Supervisor::new(&paths, SupervisorConfig::default()));

    let cwd = std::env::current_dir()?;
    if let Err(e) = supervisor.load(&cwd).await {
        error!(error = %e, "failed to load persisted instances");
    }

    let metadata_sup = Arc::clone(&supervisor);
    let metadata_task = tokio::spawn(async move {
        metadata_sup.run_metadata_tick().await;
    });

    let preview_sup = Arc::clone(&supervisor);
    let preview_task = tokio::spawn(async move {
        preview_sup.run_preview_tick(|| {}).await;
    });

    let opts = StartOptions::default();
    let web_task = if opts.web_server_enabled {
        let monitor = Arc::new(TerminalMonitor::new(Arc::clone(&supervisor)));
        let poll_monitor = Arc::clone(&monitor);
        let poll_cancel = supervisor.cancellation_token();
        tokio::spawn(async move {
            poll_monitor.run_poll_loop(poll_cancel).await;
        });

        let app = ws::router(monitor);
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], opts.web_server_port));
        info!(%addr, "web session gateway listening");
        Some(tokio::spawn(async move {
            match tokio::net::TcpListener::bind(addr).await {
                Ok(listener) => {
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "web session gateway exited");
                    }
                }
                Err(e) => error!(error = %e, "failed to bind web session gateway"),
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = supervisor.quit().await {
        error!(error = %e, "error while saving state on quit");
    }

    metadata_task.abort();
    preview_task.abort();
    if let Some(web_task) = web_task {
        web_task.abort();
    }

    std::fs::remove_file(&pid_file).ok();
    Ok(())
}
