//! coopctl — poultry-house hardware control core.
//!
//! A long-running supervisory process that polls field I/O over Modbus
//! RTU/TCP and S7, converts raw registers into engineering values, drives
//! equipment state machines, and regulates ventilation in closed loop. See
//! `DESIGN.md` for the module-by-module grounding of this implementation.

pub mod bus;
pub mod cli;
pub mod config;
pub mod datapoint;
pub mod environment;
pub mod equipment;
pub mod error;
pub mod interlock;
pub mod port_worker;
pub mod scheduler;
pub mod supervisor;
pub mod transport;

pub use supervisor::Supervisor;
