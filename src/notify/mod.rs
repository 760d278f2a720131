pub mod events;
pub mod fabric;

pub use events::Event;
pub use fabric::{ConnectionId, Fabric, PartyId};
