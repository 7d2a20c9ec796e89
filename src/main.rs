use clap::Parser;
use color_eyre::Result;
use cucm_live_monitor::{
    init_errors,
    init_logging,
    App,
};
use cucm_monitor_config::{
    Args,
    Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_errors()?;
    let config = Config::new(Args::parse())?;
    init_logging(&config.log_level)?;
    App::new(config)?.run().await
}
