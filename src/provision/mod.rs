//! Agent provisioning: users, rooms, the Space, and the engine that keeps
//! them consistent with the Letta agent set.

pub mod engine;
pub mod memory;
pub mod rooms;
pub mod spaces;
pub mod users;

pub use engine::ProvisioningEngine;
pub use memory::MatrixMemory;
pub use rooms::{agent_room_name, agent_room_topic, RoomManager};
pub use spaces::SpaceManager;
pub use users::{UserManager, UserProbe};
