use anyhow::Result;
use tracing::{error, info};

use harvest_orchestrator::cli;
use harvest_orchestrator::utils::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args();
    init_logging(args.verbose, args.log_path())?;

    info!("Starting harvest orchestrator v{}", env!("CARGO_PKG_VERSION"));

    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
