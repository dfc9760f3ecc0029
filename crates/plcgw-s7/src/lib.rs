// plcgw-s7: Minimal async client for Siemens S7 CPUs over ISO-on-TCP

pub mod client;
pub mod error;
mod frame;
mod szl;

pub use client::{ConnectOptions, CpuIdentity, DEFAULT_PORT, S7Client};
pub use error::{Error, ItemError, Result};
