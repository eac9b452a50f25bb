use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};

use bacpipe_client::{bridge, commands, ClientConfig, ClientContext};
use bacpipe_datalink::{BacnetIpTransport, DataLink, DataLinkAddress};

#[derive(Parser, Debug)]
#[command(
    name = "bacpipec",
    about = "BACnet/IP client daemon with a JSON-line control socket"
)]
struct Args {
    /// Loopback TCP port for the control socket.
    #[arg(long, default_value_t = 1235)]
    socketport: u16,
    /// Write the daemon's PID to this file on startup.
    #[arg(long)]
    pid: Option<PathBuf>,
    /// Seconds to linger collecting I-Am replies after a Who-Is.
    #[arg(long, default_value_t = 4)]
    discovery_wait: u64,
    /// Seconds to wait for a confirmed request's reply.
    #[arg(long, default_value_t = 5)]
    request_timeout: u64,
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

async fn handle_connection<D: DataLink>(ctx: &ClientContext<D>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => {}
        Ok(_) => {
            let response = commands::dispatch_line(ctx, &line).await;
            let mut out = response.to_string();
            out.push('\n');
            if let Err(err) = write_half.write_all(out.as_bytes()).await {
                warn!("control socket write failed: {err}");
            }
        }
        Err(err) => warn!("control socket read failed: {err}"),
    }
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

    let config = ClientConfig {
        request_timeout: Duration::from_secs(args.request_timeout),
        discovery_wait: Duration::from_secs(args.discovery_wait),
        bacnet_port: bind.port(),
    };
    let ctx = Arc::new(ClientContext::new(transport, config));

    tokio::spawn(bridge::run(ctx.clone()));

    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            loop {
                tick.tick().await;
                ctx.pending.sweep_expired(Duration::from_secs(60)).await;
                ctx.devices.sweep_stale(Duration::from_secs(3600)).await;
                ctx.cov.sweep_expired().await;
            }
        });
    }

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

    // One command per connection, handled sequentially.
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
                Ok((stream, _peer)) => handle_connection(&ctx, stream).await,
                Err(err) => warn!("control socket accept failed: {err}"),
            },
        }
    }

    if let Some(path) = &args.pid {
        if let Err(err) = std::fs::remove_file(path) {
            warn!("failed to remove pid file {}: {err}", path.display());
        }
    }
}
