use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chainflow::cli::Args;
use chainflow::engine::{CancelFlag, Engine};
use chainflow::pipeline::definition::{apply_cli_variables, load_pipeline};
use chainflow::report::{format_run, format_run_json};
use chainflow::{ChainflowError, Result, RunStatus};

const EXIT_RUN_FAILED: u8 = 10;
const EXIT_CANCELLED: u8 = 130;
const EXIT_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("chainflow: {err}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let pipeline = load_pipeline(&args.pipeline)?;

    if args.validate {
        println!(
            "pipeline '{}' is valid ({} steps)",
            pipeline.name,
            pipeline.steps.len()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let seed = apply_cli_variables(&args.vars)?;

    let mut engine = Engine::new()?;
    if let Some(timeout) = args.timeout {
        engine.set_timeout(timeout);
    }

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .map_err(|err| ChainflowError::Pipeline(format!("signal handler: {err}")))?;
    }

    let outcome = engine.run(&pipeline, seed, cancel).await?;

    if args.json {
        print!("{}", format_run_json(&outcome));
    } else {
        print!("{}", format_run(&outcome));
    }

    Ok(match outcome.execution.status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Cancelled => ExitCode::from(EXIT_CANCELLED),
        _ => ExitCode::from(EXIT_RUN_FAILED),
    })
}
