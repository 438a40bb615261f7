//! Unified rondo CLI.
//!
//! This binary provides a unified interface to the rondo components:
//! - `rondo router` - Run the rendezvous/relay router
//! - `rondo hash-password` - Hash a password for the user config
//!
//! The router can also be run as the standalone `rondo-router` binary.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

/// Rondo unified CLI.
#[derive(Parser)]
#[command(
    name = "rondo",
    version,
    about = "A rendezvous and relay router for remote access peers",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the router.
    #[command(name = "router", alias = "serve")]
    Router(Box<rondo_router::cli::RouterArgs>),

    /// Hash a password for use in the `[[auth.users]]` config.
    #[command(name = "hash-password")]
    HashPassword(HashPasswordArgs),
}

#[derive(Args)]
struct HashPasswordArgs {
    /// The password to hash.
    password: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Router(args) => rondo_router::cli::run(*args).await,
        Commands::HashPassword(args) => {
            println!("{}", rondo_auth::sha256_hex(&args.password));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
