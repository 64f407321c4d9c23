#![forbid(unsafe_code)]

pub mod address;
pub mod checkpoint;
pub mod cli;
pub mod engine;
pub mod formats;
pub mod frontier;
pub mod harvest;
pub mod ldes;
pub mod logging;
pub mod sink;
pub mod stats;
pub mod status;
pub mod transport;
