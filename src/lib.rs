#[macro_use]
extern crate failure;

pub mod analytics;
pub mod backend;
pub mod config;
pub mod db;
pub mod session;
pub mod source;
pub mod sync;
pub mod types;
pub mod websocket;
pub mod zones;
