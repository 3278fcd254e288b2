use thiserror::Error;

use crate::{discv4::messages::PacketDecodeErr, discv5::messages::PacketCodecError};

/// Crate-level error for callers that dispatch over both protocol versions.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discv4: {0}")]
    Discv4(#[from] PacketDecodeErr),
    #[error("discv5: {0}")]
    Discv5(#[from] PacketCodecError),
}
