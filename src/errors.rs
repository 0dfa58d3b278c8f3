// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Error types shared across the cache, codec, worker, connection and
//! daemon modules.

use std::io;

use failure::Fail;

/// Top-level error type returned by the public API of this crate.
#[derive(Debug, Fail)]
pub enum Error {
    /// Malformed save/restore-format text. The offending token and the
    /// rule/chain line it was found in are both kept for logging.
    #[fail(display = "parse error in {}: {}", context, message)]
    Parse { context: String, message: String },

    /// A load/save subprocess could not be spawned, exited non-zero, or a
    /// pipe to/from it failed.
    #[fail(display = "subprocess error ({}): {}", command, message)]
    Subprocess { command: String, message: String },

    /// A client message arrived in a state that does not accept it.
    #[fail(display = "current state is out-of-date")]
    Protocol,

    /// A socket operation failed with an errno outside the clean-
    /// disconnect set ({EBADF, ECONNRESET, EPIPE}).
    #[fail(display = "socket error: {}", 0)]
    Socket(#[cause] io::Error),

    /// `bind()` reported `EADDRINUSE`: another instance of this family's
    /// daemon is already running.
    #[fail(display = "daemon already running")]
    AlreadyRunning,

    /// Configuration file present but malformed beyond recovery (bad
    /// TOML syntax, not just a bad value for a single key).
    #[fail(display = "configuration error: {}", 0)]
    Config(String),

    /// Wraps an `io::Error` that isn't a socket-specific failure (file
    /// I/O, pipe setup, etc).
    #[fail(display = "I/O error: {}", 0)]
    Io(#[cause] io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<::toml::de::Error> for Error {
    fn from(e: ::toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
