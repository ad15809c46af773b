// Library crate for integration tests; main.rs is a thin binary over it.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod load;
pub mod monitor;
pub mod routes;
pub mod server;
pub mod state;
pub mod store;
pub mod transport;
