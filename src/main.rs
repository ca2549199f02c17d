#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    reposter_lib::run().await?;
    Ok(())
}
