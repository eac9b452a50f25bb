use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};

use bacpipe_datalink::{BacnetIpTransport, DataLinkAddress};
use bacpipe_server::{config::ServerConfig, control, service::Responder, state, trendlog, ServerState};

#[derive(Parser, Debug)]
#[command(
    name = "bacpiped",
    about = "BACnet/IP server daemon with a plain-text control socket"
)]
struct Args {
    /// BACnet device instance number.
    #[arg(default_value_t = 260001)]
    device_instance: u32,
    /// BACnet device object name.
    #[arg(default_value = "bacnetStackServer")]
    device_name: String,
    /// Loopback TCP port for the control socket.
    #[arg(long, default_value_t = 55031)]
    socketport: u16,
    /// Write the daemon's PID to this file on startup.
    #[arg(long)]
    pid: Option<PathBuf>,
    /// Object model config file, loaded at startup and saved when dirty.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// BACnet/IP bind address, overridable with `BACNET_IFACE` and
/// `BACNET_IP_PORT`.
fn bacnet_bind_address() -> SocketAddr {
    let iface = std::env::var("BACNET_IFACE")
        .ok()
        .and_then(|v| v.parse::<IpAddr>().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let port = std::env::var("BACNET_IP_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|p| *p > 0)
        .unwrap_or(DataLinkAddress::BACNET_IP_DEFAULT_PORT);
    SocketAddr::new(iface, port)
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let bind = bacnet_bind_address();
    let transport = match BacnetIpTransport::bind(bind).await {
        Ok(transport) => transport,
        Err(err) => {
            error!("failed to initialize BACnet/IP datalink on {bind}: {err}");
            std::process::exit(1);
        }
    };
    info!("BACnet/IP datalink bound on {bind}");

    let state = Arc::new(ServerState::new(
        args.device_instance,
        args.device_name.clone(),
        args.config.clone(),
    ));

    if let Some(path) = &args.config {
        match ServerConfig::load(path).await {
            Ok(config) => match state.apply_config(&config).await {
                Ok(()) => info!(
                    "config loaded from {} ({} objects)",
                    path.display(),
                    config.objects.len()
                ),
                Err(reason) => {
                    error!("invalid config {}: {reason}", path.display());
                    std::process::exit(1);
                }
            },
            Err(err) => warn!(
                "could not load config {}, starting with an empty model: {err}",
                path.display()
            ),
        }
    }

    tokio::spawn(Responder::new(transport, state.clone(), bind.port()).run());
    tokio::spawn(trendlog::run_sampler(state.clone()));
    tokio::spawn(state::run_autosave(state.clone()));

    if let Some(path) = &args.pid {
        if let Err(err) = std::fs::write(path, format!("{}\n", std::process::id())) {
            warn!("failed to write pid file {}: {err}", path.display());
        }
    }

    let control_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), args.socketport);
    let listener = match TcpListener::bind(control_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind control socket on {control_addr}: {err}");
            std::process::exit(1);
        }
    };
    info!("control socket listening on {control_addr}");

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            error!("failed to install SIGTERM handler: {err}");
            std::process::exit(1);
        }
    };

    // Persistent control connections, each served on its own task.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    tokio::spawn(control::serve_connection(state.clone(), stream));
                }
                Err(err) => warn!("control socket accept failed: {err}"),
            },
        }
    }

    state.save_if_dirty().await;

    if let Some(path) = &args.pid {
        if let Err(err) = std::fs::remove_file(path) {
            warn!("failed to remove pid file {}: {err}", path.display());
        }
    }
}
