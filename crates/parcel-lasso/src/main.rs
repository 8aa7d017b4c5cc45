// The binary uses the library, not duplicate modules
use clap::Parser;
use parcel_lasso::{Settings, logging, run};
use std::process::ExitCode;

fn main() -> ExitCode {
    let settings = Settings::parse();
    logging::setup_logging();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start the async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(settings)) {
        Ok(summary) => {
            if summary.failed_commands > 0 {
                tracing::warn!("{} command(s) were rejected", summary.failed_commands);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
