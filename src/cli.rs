use std::path::PathBuf;

use clap::{Arg, Command};

#[derive(Debug, Clone)]
pub struct DvnetConfig {
    pub socket_dir: PathBuf,
    pub def_path_override: Option<PathBuf>,
    pub verbose: bool,
}

const DEFAULT_SOCKET_DIR: &str = "/run/docker/plugins";

/// The plugin is meant to run with no flags at all; `--socket-dir` and
/// `--def` exist only as overrides for running outside a standard plugin
/// install, and default to the values a standard install assumes.
pub fn parse_args() -> DvnetConfig {
    let matches = Command::new("dvnet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Remote network driver materialising declarative container network topologies")
        .arg(
            Arg::new("socket-dir")
                .long("socket-dir")
                .value_name("DIR")
                .help("directory to create the dvnet plugin socket in")
                .default_value(DEFAULT_SOCKET_DIR)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("def")
                .long("def")
                .value_name("PATH")
                .help("override the topology definition path for every CreateNetwork call")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let socket_dir = matches
        .get_one::<String>("socket-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_DIR));
    let def_path_override = matches.get_one::<String>("def").map(PathBuf::from);
    let verbose = matches.get_flag("verbose");

    DvnetConfig {
        socket_dir,
        def_path_override,
        verbose,
    }
}
