use std::{io, path::PathBuf};

use clap::Parser;

use takedown::{
    cli::{Args, Command},
    config::read_config,
    crawl, export, rating, store,
};

use anyhow::Error;

use sqlx::Connection;

use tokio::main;

use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
};

#[main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    fmt::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => PathBuf::from("config.toml"),
    };
    let config = read_config(config_path)?;

    tracing::info!("establishing connection to database");
    let mut conn = store::connect(&config.store.database_url).await?;

    match args.command {
        Command::Crawl(crawl_args) => crawl::run(crawl_args, &config, &mut conn).await?,
        Command::Rate(rate_args) => rating::run(rate_args, &config, &mut conn).await?,
        Command::Eval(eval_args) => rating::eval::run(eval_args, &config, &mut conn).await?,
        Command::Leaderboard(leaderboard_args) => {
            export::leaderboard::run(leaderboard_args, &mut conn).await?
        }
        Command::Graph(graph_args) => export::graph::run(graph_args, &mut conn).await?,
    }

    conn.close().await?;

    Ok(())
}
