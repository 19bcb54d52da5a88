#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cluster_lifecycle_manager::cli::run().await
}
