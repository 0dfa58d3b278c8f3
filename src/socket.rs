// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Abstract UNIX socket setup, peer-credential lookup and the `NNN `
//! line-framing codec.
//!
//! Grounded in `original_source/src/server.py`'s `Server.setupSocket`
//! (raw `AF_UNIX`/`SO_REUSEADDR`/`listen(5)` socket, `SO_PEERCRED`
//! credential lookup) and `Connection.sendformat`/`run` (the `NNN `
//! reply counter and malformed-line handling). Socket setup goes
//! through raw `libc` calls rather than `std::os::unix::net` alone
//! because `std` exposes no way to set `SO_REUSEADDR` or a custom
//! listen backlog before `bind`/`listen`.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};

use crate::errors::{Error, Result};
use crate::model::AddressFamily;

const BACKLOG: i32 = 5;

/// The abstract socket name clients connect to, without the leading
/// NUL (`std::os::unix::net` abstract-socket support, where available,
/// adds it; here we add it ourselves via a raw `sockaddr_un`).
pub fn abstract_name(family: AddressFamily) -> Vec<u8> {
    format!("pytables-{}.server", family.as_str()).into_bytes()
}

fn io_err(e: io::Error) -> Error {
    Error::from(e)
}

/// Binds, listens and marks close-on-exec the abstract socket for
/// `family`. Returns `Error::AlreadyRunning` if another instance has
/// already bound it (`EADDRINUSE`), matching the original's
/// `ServerAlreadyRunning`.
pub fn bind(family: AddressFamily) -> Result<UnixListener> {
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }

        let reuse: libc::c_int = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );

        let name = abstract_name(family);
        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        // Abstract socket: sun_path[0] is the NUL marker byte (already
        // zeroed), the name follows starting at sun_path[1].
        for (i, byte) in name.iter().enumerate() {
            addr.sun_path[1 + i] = *byte as libc::c_char;
        }
        let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name.len()) as libc::socklen_t;

        if libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(if err.raw_os_error() == Some(libc::EADDRINUSE) {
                Error::AlreadyRunning
            } else {
                io_err(err)
            });
        }

        if libc::listen(fd, BACKLOG) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(io_err(err));
        }

        set_cloexec(fd)?;

        Ok(UnixListener::from_raw_fd(fd))
    }
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }
        if libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Reads `SO_PEERCRED` off an accepted stream, identifying the client
/// process for logging (`original_source` logs `client(mode,pid)`
/// lines keyed off the same lookup).
pub fn peer_credentials(stream: &UnixStream) -> Result<PeerCredentials> {
    unsafe {
        let mut ucred: libc::ucred = mem::zeroed();
        let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut ucred as *mut _ as *mut libc::c_void,
            &mut len,
        );
        if ret < 0 {
            return Err(io_err(io::Error::last_os_error()));
        }
        Ok(PeerCredentials {
            pid: ucred.pid as u32,
            uid: ucred.uid,
            gid: ucred.gid,
        })
    }
}

/// An I/O error outside this set means something genuinely went
/// wrong; inside it, the client just went away.
pub fn is_clean_disconnect(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EBADF) | Some(libc::ECONNRESET) | Some(libc::EPIPE)
    )
}

/// Assigns the `NNN ` reply-counter prefix to outgoing lines, wrapping
/// modulo `0x1000` per `original_source`'s `Connection.sendformat`.
#[derive(Debug, Default)]
pub struct Framer {
    next: u16,
}

impl Framer {
    pub fn new() -> Self {
        Framer { next: 0 }
    }

    pub fn frame(&mut self, message: &str) -> String {
        let framed = format!("{:03x} {}", self.next, message);
        self.next = (self.next + 1) % 0x1000;
        framed
    }
}

/// Strips the client's leading token off an incoming line. Per spec.md
/// §6 the server "accepts a leading opaque token from the client and
/// processes only the suffix" — the token itself is never parsed or
/// validated as hex (the original just does `data.split(' ', 1)`).
/// Returns `None` only for a malformed line with no space at all, which
/// the caller should log and discard rather than treat as a protocol
/// error, matching the original's `run()` loop.
pub fn parse_frame(line: &str) -> Option<&str> {
    let (_prefix, rest) = line.split_once(' ')?;
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_wraps_at_0x1000() {
        let mut framer = Framer::new();
        assert_eq!(framer.frame("OK"), "000 OK");
        assert_eq!(framer.frame("OK"), "001 OK");
        framer.next = 0xfff;
        assert_eq!(framer.frame("OK"), "fff OK");
        assert_eq!(framer.frame("OK"), "000 OK");
    }

    #[test]
    fn parse_frame_rejects_missing_space_only() {
        assert_eq!(parse_frame("no-prefix-here"), None);
        // An opaque, non-hex client token is accepted — only its suffix
        // matters.
        assert_eq!(parse_frame("zzz SYNC"), Some("SYNC"));
        assert_eq!(parse_frame("01a SYNC"), Some("SYNC"));
        assert_eq!(parse_frame("xxx LOAD"), Some("LOAD"));
    }

    #[test]
    fn abstract_names_are_distinct_per_family() {
        assert_ne!(abstract_name(AddressFamily::V4), abstract_name(AddressFamily::V6));
    }
}
