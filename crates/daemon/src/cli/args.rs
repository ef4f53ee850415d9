pub use clap::Parser;

use std::path::PathBuf;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "Enrollment, config and log forwarding agent for osquery hosts")]
pub struct Args {
    /// Plugin API address of a running agent (defaults to the configured port on localhost)
    #[arg(long, global = true)]
    pub remote: Option<Url>,

    /// Path to the beacon state directory (defaults to ~/.beacon)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
