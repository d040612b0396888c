pub mod inbox;
pub mod messages;
pub mod signal;

pub use inbox::InboxChannel;
pub use messages::{MessageChannel, MessageUpdate};
pub use signal::SignalChannel;
