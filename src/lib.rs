pub mod checkpoint_manager;
pub mod cluster;
pub mod config;
pub mod dialect;
pub mod error;
pub mod layout;
pub mod phase;
pub mod pipeline;
pub mod preprocessing;
pub mod reducer;
pub mod result_parser;
pub mod splitter;
pub mod table;
pub mod tnorm;
pub mod worker;

pub use error::*;
