pub mod cli;
pub mod client;
pub mod load_config;
pub mod signing;

pub use cli::{run, Cli, Commands};
