pub mod cli;
pub mod gallery;
pub mod load_config;

pub use cli::{run, Cli, Commands};
