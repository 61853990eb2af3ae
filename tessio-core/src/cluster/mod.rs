//! Wire types and the HTTP client used between Tessio nodes.

pub mod client;
pub mod types;

pub use client::PeerClient;
pub use types::{
    ActivateResponse, DeactivateResponse, FailureResponse, HeartbeatPing, PrepareResponse,
    RecoveryOutcomeKind, RecoveryRequest, RecoveryResponse, WorkerStatusResponse,
};
