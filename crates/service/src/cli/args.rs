pub use clap::Parser;

use std::path::PathBuf;

use service::config::DEFAULT_CONFIG_FILE;

#[derive(Parser, Debug)]
#[command(name = "beacon-mdm")]
#[command(about = "Android enterprise bootstrap and pub/sub receiver")]
pub struct Args {
    /// Path to the service configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: crate::Command,
}
