use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use passt_binding_lib::hooks::{grpc, PasstHookSidecar, DEFAULT_HOOK_VERSION};
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory the host scans for hook sidecar sockets
    #[arg(long, env = "PASST_BINDING_SOCKET_DIR", default_value = "/var/run/kubevirt-hooks")]
    socket_dir: PathBuf,
    #[arg(long, env = "PASST_BINDING_SOCKET_NAME", default_value = "passt.sock")]
    socket_name: String,
    /// Hook sidecar protocol version reported to the host
    #[arg(long, env = "PASST_BINDING_HOOK_VERSION", default_value = DEFAULT_HOOK_VERSION)]
    hook_version: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let socket_path = args.socket_dir.join(&args.socket_name);
    remove_socket(&socket_path)?;

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to listen on {}", socket_path.display()))?;
    info!(
        socket = %socket_path.display(),
        version = %args.hook_version,
        "passt binding hook sidecar listening"
    );

    let sidecar = Arc::new(PasstHookSidecar::new(args.hook_version));
    let served = grpc::serve(listener, sidecar, shutdown_signal()).await;

    remove_socket(&socket_path)?;
    served?;
    info!("passt binding hook sidecar stopped");

    Ok(())
}

fn remove_socket(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            warn!(%err, "cannot watch SIGTERM, only SIGINT stops the server");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
    }
}
