use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    flashbrew::cli::run().await
}
