//! Ephemeral, discovery-provided tunnel identity.
//!
//! A [`TunnelDescriptor`] is a snapshot produced fresh on every discovery
//! pass. It carries no history — that lives in [`crate::state::TunnelState`],
//! which is keyed by [`TunnelDescriptor::id`] and outlives any single
//! descriptor.

use serde::{Deserialize, Serialize};

/// One discovered GRE tunnel endpoint, as seen from the local host.
///
/// Two descriptors refer to the same tunnel entity iff their `id` fields
/// match — all other fields are refreshed from the latest discovery pass and
/// are not part of tunnel identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDescriptor {
    pub id: u32,
    pub iface_local: String,
    pub iface_remote: String,
    /// Public IP of the far endpoint, carrying the encapsulation.
    pub peer_public: String,
    /// This host's address on the encapsulated /30.
    pub local_private: String,
    /// The far endpoint's address on the encapsulated /30.
    pub peer_private: String,
}

/// Response body returned by every Agent RPC endpoint (`/v1/iface/*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub ok: bool,
    pub command_id: String,
    pub iface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request body sent to every Agent RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub command_id: String,
    pub iface: String,
}
