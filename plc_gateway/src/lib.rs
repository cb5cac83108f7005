pub mod address;
pub mod api;
pub mod channel;
pub mod config;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod schema;
pub mod tags;
pub mod triggers;
