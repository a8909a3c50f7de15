//! Built-in transports

mod log;
mod scripted;

pub use log::LogTransport;
pub use scripted::{ScriptedTransport, SentCall};
