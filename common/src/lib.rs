pub mod command;
pub mod config;
pub mod frame;
pub mod label;
