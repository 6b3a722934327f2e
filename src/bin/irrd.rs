use std::{path::PathBuf, process, sync::Arc};

use clap::Parser;

use irrd::constants::{IRRD_DEFAULT_CONFIG_FILE, IRRD_SERVER_APP};
use irrd::daemon::{config::Config, start::start_irrd_daemon};

/// The IRRd routing registry daemon.
#[derive(clap::Parser)]
#[command(version, about = "The IRRd routing registry daemon.")]
struct Args {
    /// Override the path to the config file.
    #[arg(short, long, value_name = "path", default_value = IRRD_DEFAULT_CONFIG_FILE)]
    config: String,
}

fn main() {
    let args = Args::parse();

    let config = match Config::create(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Cannot start the async runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(start_irrd_daemon(config, Some(PathBuf::from(&args.config)), None)) {
        log::error!("{IRRD_SERVER_APP} stopped: {e}");
        eprintln!("{IRRD_SERVER_APP} stopped: {e}");
        process::exit(1);
    }
}
