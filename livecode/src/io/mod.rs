//! Side-effecting seams: configuration, rule files, and the message
//! channel to the isolated host.

pub mod config;
pub mod protocol;
pub mod rules_store;
pub mod transport;
