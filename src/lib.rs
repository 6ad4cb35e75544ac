// Library exports for the rotee stream logger

pub mod cli;
pub mod config;
pub mod error;
pub mod logs;
