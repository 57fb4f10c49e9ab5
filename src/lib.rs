//! Terminal client for the personal finance tracker REST service.

pub mod cli;
pub mod config;
pub mod error;
