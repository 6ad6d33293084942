use clap::Parser;
use futures::prelude::*;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tracing::{error, info};
use whatsticker::tracing_err;

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    let args = whatsticker::BotArgs::parse();

    let logging_task = whatsticker::init_logging("whatsticker", args.log_level);

    let exit_code = AssertUnwindSafe(try_main(args))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            error!("Exitting due to a panic...");
            Ok(ExitCode::FAILURE)
        })
        .unwrap_or_else(|err| {
            error!(err = tracing_err(&err), "Exitting with an error...");
            ExitCode::FAILURE
        });

    logging_task.shutdown().await;

    exit_code
}

async fn try_main(args: whatsticker::BotArgs) -> whatsticker::Result<ExitCode> {
    let config = whatsticker::BotConfig::load_or_panic(&args);

    whatsticker::init_metrics(config.metrics.port);

    whatsticker::run_bot(config).await?;

    info!("Bot has stopped, exiting...");

    Ok(ExitCode::SUCCESS)
}
