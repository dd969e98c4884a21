pub mod api;
pub mod client;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod resource;
pub mod wal;
