use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use lockstep::config::{Cli, RunConfig};
use lockstep::data::ImageFolderDataset;
use lockstep::distributed;
use lockstep::run::run_with;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> lockstep::Result<()> {
    let comm = distributed::init_from_env()?;
    let cfg = RunConfig::from_cli(cli, comm.world_size())?;

    let size = (cfg.image_size, cfg.image_size);
    let train = ImageFolderDataset::open(&cfg.data_dir.join(&cfg.train_split), size)?;
    let val = ImageFolderDataset::open(&cfg.data_dir.join(&cfg.val_split), size)?;

    run_with(&cfg, comm, train, val)?;
    Ok(())
}
