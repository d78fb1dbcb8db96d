//! HTTP client for the site backend (`/api/...`).

mod client;
mod error;

pub use client::ApiClient;
pub use error::ApiError;
pub use jc_core::config::ApiConfig;
