use dotenvy::dotenv;

mod category;
mod config;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    server::run().await
}
