pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nfinite")]
#[command(about = "Sharded file storage across connected websocket peers")]
pub struct Args {
    /// Path to the nfinite config directory (defaults to ~/.nfinite)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
