//! Module-indexed aggregation of radio frontends.

use std::sync::{Arc, Mutex};

use log::error;

use crate::mesh::{
    Broadcaster, Frame, MeshConfig, MeshMac, Network, NetworkReceiver, NodeId,
    RadioNetwork, RadioNetworkInterface, Stats,
};
use crate::radio::{Radio, RadioConfig};
use crate::{Error, Result};

/// Owns every frontend of the gateway behind a module-indexed API.
///
/// Construction wires each radio into its own broadcaster and mesh
/// network and starts the update threads; the mesh configuration and the
/// node id are shared across frontends.
pub struct RadioService {
    networks: Vec<RadioNetwork>,
    broadcasters: Vec<Arc<Broadcaster>>,
}

impl RadioService {
    pub fn new(
        config: &MeshConfig,
        node_id: NodeId,
        radios: Vec<Arc<dyn Radio>>,
    ) -> Result<Self> {
        let mut networks = Vec::with_capacity(radios.len());
        let mut broadcasters = Vec::with_capacity(radios.len());

        for radio in radios {
            let broadcaster = Arc::new(Broadcaster::new());
            let receiver: Arc<dyn NetworkReceiver> = broadcaster.clone();

            let interface = RadioNetworkInterface::new(radio.clone());
            let mac = Network::new(config, interface, receiver, node_id)?;
            let mac: Arc<Mutex<dyn MeshMac>> = Arc::new(Mutex::new(mac));

            let mut network = RadioNetwork::new(radio, mac);
            network.start()?;

            networks.push(network);
            broadcasters.push(broadcaster);
        }

        Ok(RadioService {
            networks,
            broadcasters,
        })
    }

    pub fn module_count(&self) -> usize {
        self.networks.len()
    }

    fn network(&self, module: u8) -> Result<&RadioNetwork> {
        self.networks.get(usize::from(module)).ok_or_else(|| {
            error!("radio service: invalid module index {}", module);
            Error::InvalidArg
        })
    }

    /// Reconfigures the addressed frontend.
    pub fn configure(&self, module: u8, config: &RadioConfig) -> Result<()> {
        self.network(module)?.configure(config)
    }

    /// Queues a mesh frame on the addressed frontend. Blocks while the
    /// frontend's TX queue drains a previous payload.
    pub fn transmit(&self, module: u8, frame: &Frame) -> Result<()> {
        self.network(module)?.transmit(frame)
    }

    pub fn stats(&self, module: u8) -> Result<Stats> {
        self.network(module)?.stats()
    }

    /// Registers `listener` with every frontend's broadcaster.
    pub fn attach_listener(&self, listener: &Arc<dyn NetworkReceiver>) {
        for broadcaster in &self.broadcasters {
            broadcaster.attach_listener(listener);
        }
    }
}
