mod control_loop;
mod device;
mod host;
mod persist;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
