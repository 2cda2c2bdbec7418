pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod remote;
pub mod rooms;
pub mod sanitize;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;
