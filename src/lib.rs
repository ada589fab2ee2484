pub mod actions;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod movement;
pub mod progress;
pub mod script;
pub mod sensor;
pub mod session;
pub mod storage;
pub mod types;
pub mod world;
