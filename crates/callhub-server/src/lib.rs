//! WebSocket front end of the callhub signaling relay.
//!
//! [`server::serve`] accepts connections and pumps frames between each socket
//! and the shared [`Hub`], which applies the call state machine from
//! `callhub-core`.

pub mod config;
pub mod hub;
pub mod server;

pub use config::{Args, Config, ConfigError};
pub use hub::Hub;
