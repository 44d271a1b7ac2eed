pub mod batch;
pub mod config;
pub mod geocode;
pub mod map;
pub mod server;
