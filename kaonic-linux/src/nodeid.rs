//! Node-id source.
//!
//! The mesh id is derived from the SoC's one-time-programmable memory so
//! it survives reflashes; a board without readable OTP gets a uniform
//! random id instead.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use log::{info, warn};

use kaonic::mesh::NodeId;

pub const NVMEM_PATH: &str = "/sys/bus/nvmem/devices/stm32-romem0/nvmem";

/// Byte offset of the 64-bit unique id inside the OTP area (word 13).
pub const NVMEM_OFFSET: u64 = 13 * 4;

fn read_otp(path: &Path) -> std::io::Result<u64> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(NVMEM_OFFSET))?;
    let mut bytes = [0u8; 8];
    file.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Derives the node id from the OTP at `path`, folding in `base_id`.
/// Falls back to a random id when the OTP is unreadable or blank.
pub fn node_id_from(path: &Path, base_id: u64) -> NodeId {
    match read_otp(path) {
        Ok(raw) if raw != 0 && raw != u64::MAX => {
            let id = NodeId::new(base_id.wrapping_add(raw));
            info!("nodeid: derived {} from otp", id);
            id
        }
        Ok(_) => {
            warn!("nodeid: otp area is blank, using a random id");
            random_id(base_id)
        }
        Err(err) => {
            warn!("nodeid: unable to read {}: {}, using a random id", path.display(), err);
            random_id(base_id)
        }
    }
}

/// Derives the node id from the platform NVMEM device.
pub fn node_id(base_id: u64) -> NodeId {
    node_id_from(Path::new(NVMEM_PATH), base_id)
}

fn random_id(base_id: u64) -> NodeId {
    NodeId::new(base_id.wrapping_add(rand::random::<u64>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn otp_bytes_become_the_id() {
        let mut path = std::env::temp_dir();
        path.push(format!("kaonic-nodeid-test-{}", std::process::id()));

        {
            let mut file = File::create(&path).unwrap();
            let mut image = vec![0u8; NVMEM_OFFSET as usize];
            image.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
            file.write_all(&image).unwrap();
        }

        let id = node_id_from(&path, 0);
        assert_eq!(id.raw(), 0x1122_3344_5566_7788);

        let offset = node_id_from(&path, 0x10);
        assert_eq!(offset.raw(), 0x1122_3344_5566_7798);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_nvmem_falls_back_to_random() {
        let a = node_id_from(Path::new("/nonexistent/kaonic-nvmem"), 0);
        let b = node_id_from(Path::new("/nonexistent/kaonic-nvmem"), 0);
        // Uniform random ids; a collision here is vanishingly unlikely.
        assert_ne!(a, b);
    }
}
