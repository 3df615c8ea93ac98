#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dogy_parks::run().await
}
