use anyhow::Result;
use clap::Parser;
use cmakex::cli::Args;

/// `anyhow` prints a nicely formatted error message with `Debug`, so we can return
/// a result from the `main` function (mirrors `twoliter::main`).
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cmakex::init_logger(args.log_level);
    cmakex::run(args).await
}
