use clap::Parser;
use lakehouse_loader::cli::{self, Args};
use std::process;

fn main() {
    // Credentials may be provided through a .env file during local runs
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    cli::init_logging(&args);

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = cli::run(args) => result,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    eprintln!("\nReceived CTRL+C, aborting run");
                    Err(anyhow::anyhow!("Run interrupted by user"))
                }
                Err(e) => Err(anyhow::anyhow!("Failed to listen for CTRL+C: {}", e)),
            },
        }
    });

    match result {
        Ok(_stats) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}
