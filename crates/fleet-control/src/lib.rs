pub mod command_runner;
pub mod config;
pub mod error;
pub mod port_probe;
pub mod registry;
pub mod request_id;
pub mod routes;
pub mod state;
pub mod store;
pub mod supervisor;
