pub mod config;
pub mod error;
pub mod handle_map;

pub use config::{BridgeConfig, FeatureLevel};
pub use error::CoreError;
pub use handle_map::HandleMap;
