mod sources;
mod state;
mod store;

pub use jc_core::config::StoreConfig;
pub use sources::{JobSource, StatsSource};
pub use state::AppState;
pub use store::{AppStore, ChangeListener, StoreError};
