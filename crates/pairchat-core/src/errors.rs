use crate::ids::ConnectionId;

/// Invariant violations inside the matching engine.
///
/// Benign not-found races (relay without a partner, teardown of an unknown
/// connection) are never reported through this type; they are silent no-ops.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    #[error("connection already paired: {0}")]
    AlreadyPaired(ConnectionId),

    #[error("connection cannot pair with itself: {0}")]
    SelfPairing(ConnectionId),
}
