pub mod board;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod engagement;
pub mod error;
pub mod http;
pub mod rng;
pub mod rules;
pub mod store;
pub mod taunt;
pub mod types;
