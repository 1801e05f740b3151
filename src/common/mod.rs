pub mod commands;
pub mod events;
pub mod types;

pub use commands::EngineCommand;
pub use events::{EngineEvent, SyncStatus};
pub use types::{Collection, Message, MessageReaction, Reaction, ReactionKind, Row};
