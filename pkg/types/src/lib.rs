pub mod config;
pub mod verbosity;
