//! Namespaced push-channel client with fixed-delay reconnect, plus the two
//! listeners built on it (live statistics and lead notifications).

mod client;
mod error;
mod listeners;

pub use client::{ChannelClient, ChannelMessage, ChannelStatus, Subscription};
pub use error::ChannelError;
pub use jc_core::config::{ChannelConfig, ReconnectPolicy};
pub use listeners::{LeadListener, StatsListener};
