use anyhow::Result;
use structopt::StructOpt;
use train::Args;

#[tokio::main]
pub async fn main() -> Result<()> {
    // default to info-level logging unless RUST_LOG overrides it
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(log::LevelFilter::Info);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    }
    builder.init();

    let args = Args::from_args();
    train::start(args).await
}
