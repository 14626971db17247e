pub mod bot;
pub mod commands;
pub mod config;
pub mod error;
pub mod message;
pub mod normalize;
pub mod outbound;
pub mod scheduler;
pub mod transport;
