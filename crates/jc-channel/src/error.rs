use jc_core::config::ConfigError;
use thiserror::Error;

/// Only setup can fail. Transport faults after that are reported through
/// [`crate::ChannelStatus`], never as errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel endpoint: {0}")]
    Endpoint(#[from] ConfigError),
    #[error("no tokio runtime available to drive the channel")]
    NoRuntime,
}
