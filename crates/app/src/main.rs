mod app;
mod frame_timer;
mod probe;

use anyhow::Result;
use clap::Parser;

use crate::app::{App, Args};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut app = App::new(args).await?;
    app.run().await
}
