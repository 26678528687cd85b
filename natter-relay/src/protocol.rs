/// Wire protocol version. Bump this whenever a breaking change is made to
/// `WireMessage` variants or any borsh-serialized frame type.
pub const PROTOCOL_VERSION: u8 = 1;

/// Request-response protocol carrying flood frames.
pub const FLOOD_PROTOCOL: &str = "/natter/flood/1.0.0";

/// Kademlia protocol used for peer discovery.
pub const KAD_PROTOCOL: &str = "/natter/kad/1.0.0";

/// Identify protocol version string.
pub const IDENTIFY_PROTOCOL: &str = "/natter/1.0.0";

/// Agent string advertised in `Hello` and identify.
pub fn agent_version() -> String {
    format!("natter/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_version_prefix() {
        assert!(agent_version().starts_with("natter/"));
    }

    #[test]
    fn test_protocol_ids_are_versioned() {
        assert!(FLOOD_PROTOCOL.ends_with("/1.0.0"));
        assert!(IDENTIFY_PROTOCOL.starts_with("/natter/"));
        assert!(KAD_PROTOCOL.starts_with("/natter/kad/"));
    }
}
