pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod wire;
pub mod worker;
