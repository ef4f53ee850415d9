mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, AddEnrollSecret, AddUser, Serve};

command_enum! {
    (AddEnrollSecret, AddEnrollSecret),
    (AddUser, AddUser),
    (Serve, Serve),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let ctx = cli::op::OpContext::new(args.config);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
