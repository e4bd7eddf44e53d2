//! Communications daemon of the kaonic radio gateway.
//!
//! Brings up one mesh network per radio frontend, then serves application
//! clients over the TCP RPC channel and, optionally, an HDLC serial link.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info, warn};

use kaonic::mesh::{MeshConfig, NetworkReceiver};
use kaonic::service::rpc::{self, RpcServer, DEFAULT_LISTEN_URL};
use kaonic::service::serial::SerialService;
use kaonic::service::RadioService;
use kaonic_linux::frontend::open_frontend;
use kaonic_linux::serial_port::TtyPort;
use kaonic_linux::{machine, nodeid};

#[derive(Parser)]
#[command(name = "kaonic-commd", about = "kaonic radio gateway daemon")]
struct Args {
    /// RPC listen address.
    #[arg(long, default_value = DEFAULT_LISTEN_URL)]
    listen: String,

    /// Override the machine name instead of reading /etc/kaonic.
    #[arg(long)]
    machine: Option<String>,

    /// Serve the HDLC protocol on this serial device.
    #[arg(long)]
    serial: Option<PathBuf>,

    /// Mesh packet pattern.
    #[arg(long, default_value_t = 0x77)]
    packet_pattern: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let machine = match &args.machine {
        Some(name) => machine::machine_by_name(name),
        None => machine::detect(),
    };
    info!("starting on machine {}", machine.name);

    // Frontends that fail to come up are skipped; the daemon runs with
    // whatever hardware responds.
    let mut radios = Vec::new();
    for desc in &machine.frontends {
        match open_frontend(desc) {
            Ok(radio) => radios.push(radio),
            Err(err) => error!("frontend {}: startup aborted: {}", desc.name, err),
        }
    }
    if radios.is_empty() {
        bail!("no radio frontend came up");
    }

    let mesh_config = MeshConfig {
        packet_pattern: args.packet_pattern,
        slot_duration: Duration::from_millis(50),
        gap_duration: Duration::from_millis(5),
        beacon_interval: Duration::from_millis(100),
        base_id: 0,
    };
    let node_id = nodeid::node_id(mesh_config.base_id);
    info!("mesh node id {}", node_id);

    let service = Arc::new(
        RadioService::new(&mesh_config, node_id, radios)
            .map_err(|err| anyhow::anyhow!("radio service startup failed: {}", err))?,
    );

    // Listeners attach before any client traffic exists. The broadcaster
    // holds weak references, so the strong handles stay in main for the
    // daemon's lifetime.
    let (rpc_listener, rpc_frames) = rpc::receive_channel();
    let rpc_listener: Arc<dyn NetworkReceiver> = rpc_listener;
    service.attach_listener(&rpc_listener);

    let mut serial_service = None;
    if let Some(path) = &args.serial {
        let port = Arc::new(
            TtyPort::open(path)
                .map_err(|err| anyhow::anyhow!("serial startup failed: {}", err))?,
        );
        let mut serial = SerialService::new(port, service.clone());
        let listener: Arc<dyn NetworkReceiver> = serial.listener();
        service.attach_listener(&listener);
        serial
            .start()
            .map_err(|err| anyhow::anyhow!("serial rx startup failed: {}", err))?;
        // The listener must outlive the service; keep both together.
        serial_service = Some((serial, listener));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, shutdown.clone())
            .context("unable to register signal handler")?;
    }

    let server = RpcServer::new(service.clone(), rpc_frames, shutdown.clone());
    if let Err(err) = server.serve(&args.listen) {
        error!("rpc server failed: {}", err);
    }

    info!("shutting down");
    shutdown.store(true, Ordering::SeqCst);
    if let Some((mut serial, _listener)) = serial_service.take() {
        if serial.stop().is_err() {
            warn!("serial rx thread did not stop cleanly");
        }
    }
    // Dropping the service stops every frontend's update thread.
    drop(service);

    Ok(())
}
