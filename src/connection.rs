// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Per-client connection state machine.
//!
//! Grounded in `original_source/src/server.py`'s
//! `ConnectionState{Void,Sync,Load,Save,Done,Boot}` classes, rewritten
//! from generator-coroutines into a single `handle` method that is a
//! pure function of `(state, line, cache, worker) -> (replies,
//! next_state)`. The original's separate `on_entry`/`running` step
//! (needed only because a Python generator can't both run to
//! completion *and* yield a reply in one call) collapses here into the
//! tail of `handle` itself — there is no scheduler boundary in Rust
//! forcing it to be a second, separately-driven step. `Done` likewise
//! never persists as an observable state: it exists only as the
//! `fanout` flag on `ConnOutcome`, which the daemon's event loop uses
//! to decide whether to invalidate every other client after a
//! successful `COMMIT`.

use std::collections::HashMap;

use crate::cache::Cache;
use crate::errors::{Error, Result};
use crate::model::AddressFamily;
use crate::worker::Worker;

#[derive(Debug)]
enum ConnState {
    /// Freshly connected, or just invalidated by another client's
    /// commit. Rejects `SAVE` until the client re-syncs.
    Void,
    /// Client's view of the cache is known current.
    Sync,
    /// Accumulating a client's `SAVE` batch, keyed by table name, until
    /// `COMMIT` or disconnect.
    Save {
        tables: HashMap<String, Vec<String>>,
        current: Option<String>,
    },
    /// Transient: only ever observed mid-`BOOT`, which resolves back to
    /// `Void` within the same `handle` call.
    Boot,
}

pub struct Connection {
    state: ConnState,
    pub family: AddressFamily,
    pub pid: u32,
    pub uid: u32,
}

#[derive(Debug, Default)]
pub struct ConnOutcome {
    pub replies: Vec<String>,
    /// Set once, on a successful `COMMIT`: the daemon must move every
    /// other client on this family to `Void`.
    pub fanout: bool,
}

impl Connection {
    pub fn new(family: AddressFamily, pid: u32, uid: u32) -> Self {
        Connection {
            state: ConnState::Void,
            family,
            pid,
            uid,
        }
    }

    #[cfg(test)]
    fn is_void(&self) -> bool {
        matches!(self.state, ConnState::Void)
    }

    #[cfg(test)]
    fn is_sync(&self) -> bool {
        matches!(self.state, ConnState::Sync)
    }

    /// Another client's commit succeeded: this client's view is now
    /// stale regardless of what it was doing.
    pub fn invalidate(&mut self) {
        self.state = ConnState::Void;
    }

    /// Drives one client message to completion, returning the reply
    /// line(s) to send and whether every other client on this family
    /// must now be invalidated.
    pub fn handle(&mut self, line: &str, cache: &mut Cache, worker: &mut Worker) -> Result<ConnOutcome> {
        let mut out = ConnOutcome::default();

        // `SYNC`'s effect depends on the state it arrives in (void: run
        // the same reload `LOAD` does; sync: a no-op acknowledgement),
        // so the prior state has to be known before anything mutates
        // it. Capture it as a plain tag up front rather than matching
        // `&mut self.state` for the whole function, which would hold a
        // borrow across the `self.state = ...` assignments below.
        let was_void = matches!(self.state, ConnState::Void);
        let was_sync = matches!(self.state, ConnState::Sync);

        if was_void || was_sync {
            if line == "LOAD" || (line == "SYNC" && was_void) {
                let fresh = worker.load()?;
                cache.load(self.family, &fresh, true)?;
                out.replies.extend(cache.save(self.family));
                out.replies.push("OK".to_string());
                self.state = ConnState::Sync;
                return Ok(out);
            }
            if line == "SYNC" {
                // was_sync: already current, nothing to reload.
                out.replies.push("OK".to_string());
                self.state = ConnState::Sync;
                return Ok(out);
            }
            if line == "BOOT" {
                worker.restart()?;
                let fresh = worker.load()?;
                cache.load(self.family, &fresh, true)?;
                out.replies.push("OK".to_string());
                self.state = ConnState::Void;
                return Ok(out);
            }
            if line == "SAVE" {
                if was_void {
                    out.replies.push("FAILURE/current state is out-of-date".to_string());
                    return Ok(out);
                }
                self.state = ConnState::Save {
                    tables: HashMap::new(),
                    current: None,
                };
                return Ok(out);
            }
            if line == "COMMIT" && was_sync {
                // A bare COMMIT with no preceding SAVE is an empty
                // batch: nothing was ever buffered, so there is
                // nothing to write to the restore utility and
                // nothing changed for any other client to resync
                // against.
                out.replies.push("OK".to_string());
                return Ok(out);
            }
            return Err(Error::Protocol);
        }

        match &mut self.state {
            ConnState::Save { tables, current } => {
                if let Some(name) = line.strip_prefix("TABLE/") {
                    tables.entry(name.to_string()).or_insert_with(Vec::new);
                    *current = Some(name.to_string());
                    return Ok(out);
                }
                if line != "COMMIT" {
                    // Append to the current table's buffer if there is
                    // one; otherwise silently ignore the line, matching
                    // the original's `elif self.curr is not None`.
                    if let Some(table) = current.as_ref() {
                        if let Some(buf) = tables.get_mut(table) {
                            buf.push(line.to_string());
                        }
                    }
                    return Ok(out);
                }
                // fall through: COMMIT, handled below.
            }
            ConnState::Boot => return Err(Error::Protocol),
            ConnState::Void | ConnState::Sync => unreachable!("handled above"),
        }

        let tables = match std::mem::replace(&mut self.state, ConnState::Sync) {
            ConnState::Save { tables, .. } => tables,
            _ => unreachable!("guarded above"),
        };

        let mut commit_lines = Vec::new();
        for (name, body) in &tables {
            commit_lines.push(format!("*{}", name));
            commit_lines.extend(body.iter().cloned());
            commit_lines.push("COMMIT".to_string());
        }

        match worker.commit(&commit_lines) {
            Ok(()) => {
                cache.load(self.family, &commit_lines, false)?;
                out.replies.push("OK".to_string());
                out.fanout = true;
                self.state = ConnState::Sync;
            }
            Err(e) => {
                // spec.md §4.3's transition table sends `save`+`COMMIT`
                // to `sync` unconditionally; a failed commit withholds
                // `fanout` but does not force an extra re-LOAD.
                out.replies.push(format!("FAILURE/{}", e));
                self.state = ConnState::Sync;
            }
        }

        Ok(out)
    }
}
