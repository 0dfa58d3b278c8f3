// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Root logger construction.
//!
//! Grounded in `dfw`'s dependency on `slog`/`sloggers`: a single root
//! `Logger` is built once at startup and cloned (cheap, `Arc`-backed)
//! into the daemon, each worker and each connection, which add their
//! own key-value context via `.new(o!(...))` — mirroring the
//! original's `client(mode,pid) ...` / `worker(mode,line) ...`
//! prefixed debug lines with structured fields instead of string
//! interpolation.
//!
//! `log_to_disk` takes priority over `log_to_console` when both are
//! set: `sloggers`' builders each hand back a finished `Logger` rather
//! than a composable `Drain`, so fanning out to both sinks at once
//! would need a third drain-level dependency outside the teacher's
//! stack. A single active sink is a reasonable simplification of the
//! original's independent `log_to_disk`/`log_to_console` booleans.

use sloggers::file::FileLoggerBuilder;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

use slog::{o, Discard, Logger};

use crate::config::Config;
use crate::errors::{Error, Result};

pub fn build(config: &Config) -> Result<Logger> {
    let severity = if config.debug {
        Severity::Debug
    } else {
        Severity::Info
    };

    let logger = if let Some(path) = &config.log_to_disk {
        let mut builder = FileLoggerBuilder::new(path);
        builder.level(severity);
        builder.build().map_err(|e| Error::Config(e.to_string()))?
    } else if config.log_to_console {
        let mut builder = TerminalLoggerBuilder::new();
        builder.destination(Destination::Stderr);
        builder.level(severity);
        builder.build().map_err(|e| Error::Config(e.to_string()))?
    } else {
        Logger::root(Discard, o!())
    };

    Ok(logger.new(o!("family" => config.family.as_str())))
}
