mod auth;
mod host;
mod provisioning;
mod sim;
mod sync;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
