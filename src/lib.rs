pub mod config;
pub mod error;
pub mod implementations;
pub mod layers;
pub mod types;
pub mod wallet;
