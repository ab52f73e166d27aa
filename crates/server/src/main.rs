#[tokio::main]
async fn main() -> anyhow::Result<()> {
    commonio_server::run().await
}
