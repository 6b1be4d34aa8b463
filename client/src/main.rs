mod api;
mod cli;
mod config;
mod importer;
mod records;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
