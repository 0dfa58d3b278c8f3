// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! CLI entrypoint: parses arguments, resolves configuration, builds
//! the logger, and runs one family's daemon to completion.
//!
//! Grounded in `dfw`'s `clap`-based `src/bin/dfw.rs`. Unlike the
//! original Python daemon this process never double-forks: it runs in
//! the foreground and leaves daemonization to the service supervisor,
//! which is the split `dfw` itself uses.

use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use clap::{App, Arg};
use slog::{error, info, o};

use pytables::daemon::Daemon;
use pytables::errors::Error;
use pytables::model::AddressFamily;
use pytables::{config, logging};

fn main() {
    let matches = App::new("pytables-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Packet-filter rule broker daemon mediating client access to iptables/ip6tables")
        .arg(
            Arg::with_name("family")
                .long("family")
                .takes_value(true)
                .required(true)
                .possible_values(&["ipv4", "ipv6"])
                .help("Address family this instance serves"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .default_value(config::DEFAULT_CONFIG_PATH)
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::with_name("debug")
                .long("debug")
                .help("Force debug-level logging regardless of config/environment"),
        )
        .get_matches();

    let family = AddressFamily::from_str(matches.value_of("family").expect("required"))
        .expect("validated by clap possible_values");
    let config_path = PathBuf::from(matches.value_of("config").expect("has default"));

    let bootstrap_logger = slog::Logger::root(slog::Discard, o!());

    let mut resolved = match config::load(&bootstrap_logger, &config_path, family) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if matches.is_present("debug") {
        resolved.debug = true;
    }

    let logger = match logging::build(&resolved) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let mut daemon = Daemon::new(logger.clone(), &resolved);
    match daemon.run() {
        Ok(()) => process::exit(0),
        Err(Error::AlreadyRunning) => {
            info!(logger, "another instance is already running for this family");
            process::exit(0);
        }
        Err(e) => {
            error!(logger, "daemon exited with error"; "error" => e.to_string());
            process::exit(1);
        }
    }
}
