pub mod cli;
pub mod daemon;
pub mod errors;
pub mod installer;
pub mod models;
pub mod progress;
pub mod server;
pub mod spawner;
pub mod storage;
