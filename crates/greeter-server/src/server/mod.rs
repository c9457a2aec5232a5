pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod rpc;
pub mod service;
pub mod supervisor;
pub mod telemetry;
