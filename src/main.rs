#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! mbus-proxy: shares one M-Bus slave between an external master and a local master.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mbus_protocol::config::ProxyConfig;
use mbus_protocol::monitoring::{http, logging, metrics::Metrics};
use mbus_protocol::proxy::{Multiplexer, Port};
use mbus_protocol::serial::{open_serial, SerialConfig};
use mbus_protocol::MbusCodec;
use tokio::signal;
use tokio_serial::SerialStream;
use tokio_util::codec::{Decoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, long_version = mbus_protocol::LONG_VERSION, about)]
struct Args {
    /// TOML configuration file; flags below override its values.
    #[arg(short, long, env = "MBUS_PROXY_CONFIG", value_hint = clap::ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[arg(long, env = "MBUS_PROXY_TTY_EXTERNAL_MASTER", value_name = "TTY", value_hint = clap::ValueHint::FilePath)]
    tty_path_external_master: Option<String>,

    #[arg(long, env = "MBUS_PROXY_TTY_SLAVE", value_name = "TTY", value_hint = clap::ValueHint::FilePath)]
    tty_path_slave: Option<String>,

    #[arg(long, env = "MBUS_PROXY_TTY_LOCAL_MASTER", value_name = "TTY", value_hint = clap::ValueHint::FilePath)]
    tty_path_local_master: Option<String>,

    #[arg(short, long, env = "MBUS_PROXY_BAUDRATE")]
    serial_baudrate: Option<u32>,

    #[arg(long, env = "MBUS_PROXY_LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "MBUS_PROXY_LOG_FORMAT", value_enum)]
    log_format: Option<logging::LogFormat>,

    /// Serve Prometheus metrics, e.g. 127.0.0.1:9464.
    #[arg(long, env = "MBUS_PROXY_METRICS_ADDR")]
    metrics_addr: Option<std::net::SocketAddr>,
}

impl Args {
    fn into_config(self) -> Result<ProxyConfig> {
        let mut cfg = match &self.config {
            Some(path) => ProxyConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(p) = self.tty_path_external_master {
            cfg.ports.external_master = Some(p);
        }
        if let Some(p) = self.tty_path_slave {
            cfg.ports.slave = Some(p);
        }
        if let Some(p) = self.tty_path_local_master {
            cfg.ports.local_master = Some(p);
        }
        if let Some(b) = self.serial_baudrate {
            cfg.serial.baudrate = b;
        }
        if let Some(l) = self.log_level {
            cfg.monitoring.log_level = l;
        }
        if let Some(f) = self.log_format {
            cfg.monitoring.log_format = f;
        }
        if let Some(a) = self.metrics_addr {
            cfg.monitoring.metrics_addr = Some(a);
        }

        cfg.validate().context("Invalid configuration")?;
        Ok(cfg)
    }
}

fn open_port(cfg: &ProxyConfig, port: Port) -> Result<Framed<SerialStream, MbusCodec>> {
    let path = cfg.port_path(port)?;
    let serial = open_serial(path, &cfg.serial)
        .with_context(|| format!("Failed to open {port} port {path}"))?;
    Ok(MbusCodec::new().framed(serial))
}

fn spawn_sigint_watcher(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            warn!(%err, "failed to listen for SIGINT");
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Args::parse().into_config()?;
    logging::init_logging(cfg.log_level()?, cfg.monitoring.log_format);

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let token = CancellationToken::new();
    spawn_sigint_watcher(token.clone());

    let metrics_task = match cfg.monitoring.metrics_addr {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind metrics endpoint {addr}"))?;
            Some(tokio::spawn(http::serve_metrics(
                listener,
                metrics.clone(),
                token.clone(),
            )))
        }
        None => None,
    };

    let external_master = open_port(&cfg, Port::ExternalMaster)?;
    let slave = open_port(&cfg, Port::Slave)?;
    let local_master = open_port(&cfg, Port::LocalMaster)?;

    let SerialConfig { baudrate, parity } = &cfg.serial;
    info!(baudrate, ?parity, "mbus-proxy starting");

    let mut mux = Multiplexer::new(
        cfg.routing()?,
        metrics,
        external_master,
        slave,
        local_master,
    );
    let result = mux.run(&token).await;

    token.cancel();
    if let Some(task) = metrics_task {
        match task.await {
            Ok(Err(err)) => warn!(%err, "metrics endpoint failed"),
            Err(err) => warn!(%err, "metrics task panicked"),
            Ok(Ok(())) => {}
        }
    }

    result.context("Multiplexer stopped")?;
    info!("mbus-proxy stopped");
    Ok(())
}
