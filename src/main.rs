mod addressing;
mod builder;
mod cli;
mod config;
mod container;
mod error;
mod graph;
mod network;
mod persistence;
mod rpc;
mod sysctl;

use std::sync::Arc;

use log::error;

use crate::cli::parse_args;
use crate::container::BollardRuntime;
use crate::rpc::Driver;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let config = parse_args();

    let level = if config.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .format_timestamp_micros()
        .format_module_path(false)
        .filter_level(level)
        .init();

    let runtime = match BollardRuntime::connect() {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            error!("couldn't connect to the container runtime: {e}");
            std::process::exit(1);
        }
    };

    let driver = Arc::new(Driver::new(runtime, config.def_path_override));

    if let Err(e) = rpc::serve(driver, &config.socket_dir).await {
        error!("remote-driver server error: {e}");
        std::process::exit(1);
    }
}
