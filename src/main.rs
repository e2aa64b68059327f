use axum::Router;
use sessionpool::config::Config;
use sessionpool::db::Metadata;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    sessionpool::run(config, Metadata::new(), Router::new()).await
}
