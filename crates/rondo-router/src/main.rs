//! Router standalone binary.

use clap::Parser;
use rondo_router::cli::{self, RouterArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = RouterArgs::parse();
    cli::run(args).await
}
