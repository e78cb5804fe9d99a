pub mod errors;
pub mod events;
pub mod ids;

pub use errors::EngineError;
pub use events::{
    ChatPartner, ClientEvent, ConnectionInfo, RelayEvent, RelayKind, ServerEvent, ANONYMOUS,
};
pub use ids::ConnectionId;
