//! Notification relay — receives doctors' verdicts on a side channel and
//! turns them into bus events, independently of any running conversation.

pub mod notifier;
pub mod source;

pub use notifier::{Relay, format_verdict};
pub use source::{ReplyListener, SubscribeListener, Verdict, VerdictListener, parse_verdict_line};
