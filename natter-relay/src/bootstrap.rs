use std::path::{Path, PathBuf};

use libp2p::{Multiaddr, PeerId};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Default location of the bootstrap file: `~/.natter/bootstrap.toml`.
pub fn default_bootstrap_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".natter").join("bootstrap.toml"))
        .unwrap_or_else(|| PathBuf::from("bootstrap.toml"))
}

/// Contact details of a bootstrap node, as written by `natter bootstrap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapFile {
    pub bootstrap: BootstrapInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapInfo {
    pub peer_id: String,
    pub address: String,
}

impl BootstrapInfo {
    /// `address/p2p/peer_id`, checking both parts parse.
    pub fn multiaddr(&self) -> Result<String, RelayError> {
        let peer: PeerId = self.peer_id.parse().map_err(|e| RelayError::ConfigError {
            reason: format!("invalid bootstrap peer_id '{}': {}", self.peer_id, e),
        })?;
        let addr: Multiaddr = self.address.parse().map_err(|e| RelayError::ConfigError {
            reason: format!("invalid bootstrap address '{}': {}", self.address, e),
        })?;
        Ok(format!("{}/p2p/{}", addr, peer))
    }
}

impl BootstrapFile {
    pub fn new(peer_id: &PeerId, address: &Multiaddr) -> Self {
        Self {
            bootstrap: BootstrapInfo {
                peer_id: peer_id.to_string(),
                address: address.to_string(),
            },
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| RelayError::ConfigError {
            reason: format!("failed to read bootstrap file '{}': {}", path.display(), e),
        })?;
        toml::from_str(&contents).map_err(|e| RelayError::ConfigError {
            reason: format!("failed to parse bootstrap file '{}': {}", path.display(), e),
        })
    }

    /// Boot node multiaddr from the file at `path`.
    pub fn boot_node(path: impl AsRef<Path>) -> Result<String, RelayError> {
        Self::load(path)?.bootstrap.multiaddr()
    }

    pub fn save(&self, path: &Path) -> Result<(), RelayError> {
        let io_error = |e: std::io::Error| RelayError::ConfigError {
            reason: format!("failed to write bootstrap file '{}': {}", path.display(), e),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(io_error)?;
            }
        }
        let toml_str = toml::to_string_pretty(self).map_err(|e| RelayError::ConfigError {
            reason: format!("failed to serialize bootstrap file: {}", e),
        })?;
        std::fs::write(path, toml_str).map_err(io_error)
    }
}
