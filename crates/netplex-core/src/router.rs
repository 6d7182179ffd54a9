//! Outbound Routing
//!
//! Decides how a logical send maps onto physical transport sends.

use netplex_network::{PeerId, TARGET_PEER_SERVER};

/// Part this peer plays in hub relaying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    /// Pure point-to-point; every Sys packet is rejected
    Disabled,
    /// We are the hub and forward between clients
    Hub,
    /// We reach other clients through the hub
    Client,
}

impl RelayRole {
    /// Relay is in effect only when enabled locally and supported by the transport
    pub fn resolve(enabled: bool, local_id: PeerId, transport_supports_relay: bool) -> Self {
        if !enabled || !transport_supports_relay {
            RelayRole::Disabled
        } else if local_id == TARGET_PEER_SERVER {
            RelayRole::Hub
        } else {
            RelayRole::Client
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, RelayRole::Disabled)
    }
}

/// Routing decision for one logical send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Wrap in a relay envelope addressed to `destination` and send to the hub
    Relay { destination: PeerId },
    /// One send per connected peer, skipping `excluded`
    BroadcastExcept { excluded: PeerId },
    /// Single physical send to a peer id or the broadcast sentinel
    Direct(PeerId),
}

/// Route a send to `to` given our relay role
pub fn route(to: PeerId, role: RelayRole) -> RouteDecision {
    if role == RelayRole::Client && to != TARGET_PEER_SERVER {
        RouteDecision::Relay { destination: to }
    } else if to < 0 {
        RouteDecision::BroadcastExcept {
            excluded: to.wrapping_neg(),
        }
    } else {
        RouteDecision::Direct(to)
    }
}
