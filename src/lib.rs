pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod sweeper;
pub mod wal;
pub mod webhook;
