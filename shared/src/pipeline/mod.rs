//! Pipeline board types
//!
//! History records, move intents, stage view models and toast notifications.

pub mod event;
pub mod intent;
pub mod notification;
pub mod view;

pub use event::{
    Actor, ChainBreak, ChainVerification, GENESIS_HASH, HistoryEvent, HistoryEventKind,
    verify_chain,
};
pub use intent::MoveIntent;
pub use notification::Notification;
pub use view::StageView;
