pub mod events;
pub mod ids;

pub use events::{EventPayload, RoomEvent};
pub use ids::{ConnectionId, IdError, MessageId, RoomId};
