//! Channel abstraction for message I/O.

pub mod channel;
pub mod cli;
pub mod dispatch;
pub mod outbound;
pub mod telegram;

pub use channel::*;
pub use cli::CliChannel;
pub use dispatch::NotificationDispatcher;
pub use outbound::{Outbound, RetryPolicy};
pub use telegram::TelegramChannel;
