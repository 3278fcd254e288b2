//! # etherscope discovery
//!
//! Decoders for the Ethereum peer-discovery wire protocols, built for
//! passive observation: feed in raw UDP payloads, get typed, authenticated
//! packets back.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`discv4`] | Node discovery v4: hash-then-signature packets, sender recovery |
//! | [`discv5`] | Node discovery v5: masked headers, per-flag auth data, GCM bodies |
//! | [`types`]  | Shared wire types (endpoints, nodes, ENR records) |
//! | [`utils`]  | Key recovery and node-id helpers |
//!
//! Every decode path is a pure function of its input plus the local node's
//! identity. Nothing here opens sockets or keeps state across packets; the
//! discv5 session keys come from a caller-supplied
//! [`SessionKeyProvider`](discv5::session::SessionKeyProvider).

pub mod discv4;
pub mod discv5;
pub mod error;
pub mod types;
pub mod utils;

use ethereum_types::H256;
use keccak_hash::keccak;
use tracing::debug;

use crate::{discv4::messages::MAC_SIZE, discv5::session::SessionKeyProvider, error::DiscoveryError};

/// Discovery packets are carried in single UDP datagrams and never exceed
/// this size.
pub const MAX_DISC_PACKET_SIZE: usize = 1280;

/// A decoded datagram from either protocol generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryPacket {
    V4(discv4::messages::Packet),
    V5(discv5::messages::Packet),
}

impl DiscoveryPacket {
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryPacket::V4(packet) => packet.kind().name(),
            DiscoveryPacket::V5(packet) => packet.name(),
        }
    }
}

/// Classifies and decodes a raw datagram.
///
/// Datagrams carry no explicit version tag, so the protocol is probed: a
/// buffer whose leading 32 bytes are the keccak hash of the remainder is
/// discv4, anything else is attempted as discv5 addressed to
/// `local_node_id`.
pub fn decode_datagram<K: SessionKeyProvider>(
    buf: &[u8],
    local_node_id: &H256,
    keys: &K,
) -> Result<DiscoveryPacket, DiscoveryError> {
    if has_discv4_mac_prefix(buf) {
        let packet = discv4::messages::Packet::decode(buf)?;
        debug!(kind = packet.kind().name(), sender = %packet.get_node_id(), "decoded discv4 packet");
        return Ok(DiscoveryPacket::V4(packet));
    }

    let packet = discv5::messages::Packet::decode(local_node_id, keys, buf)?;
    debug!(kind = packet.kind().name(), "decoded discv5 packet");
    Ok(DiscoveryPacket::V5(packet))
}

fn has_discv4_mac_prefix(buf: &[u8]) -> bool {
    buf.len() > MAC_SIZE && keccak(&buf[MAC_SIZE..]).as_bytes() == &buf[..MAC_SIZE]
}
