// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The listener, client registry and single-threaded event loop.
//!
//! Grounded in `original_source/src/server.py`'s `Server` class (abstract
//! socket, 5s idle-accept timeout, peer-credential lookup, invalidation
//! fanout on commit) and `gnosis_vpn-client`'s `gnosis_vpn/src/main.rs`
//! for the concurrency shape: a dedicated OS thread per blocking I/O
//! source (`accept()`, each client's line reader, the signal handler)
//! forwards events into one shared `crossbeam_channel`; everything that
//! touches `Cache`/`Worker`/`Connection` state happens on the single
//! thread draining that channel via `select!`, so exactly one piece of
//! application logic runs at a time.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, Sender};
use signal_hook::iterator::Signals;
use slog::{debug, info, o, warn, Logger};

use crate::cache::Cache;
use crate::config::Config;
use crate::connection::Connection;
use crate::errors::{Error, Result};
use crate::model::AddressFamily;
use crate::socket::{self, Framer};
use crate::worker::Worker;

type ClientId = u64;

enum Event {
    Accepted(UnixStream),
    Line(ClientId, String),
    Closed(ClientId),
}

struct Client {
    stream: UnixStream,
    conn: Connection,
    framer: Framer,
}

pub struct Daemon {
    family: AddressFamily,
    logger: Logger,
    cache: Cache,
    worker: Worker,
    idle_timeout: Duration,
}

impl Daemon {
    pub fn new(logger: Logger, config: &Config) -> Self {
        let worker = Worker::new(
            config.family,
            config.load_command.clone(),
            config.save_command.clone(),
            logger.clone(),
        );
        Daemon {
            family: config.family,
            logger,
            cache: Cache::new(),
            worker,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    /// Binds the socket and runs the event loop to completion. Returns
    /// normally on idle timeout or a graceful shutdown signal.
    pub fn run(&mut self) -> Result<()> {
        let listener = socket::bind(self.family)?;
        info!(self.logger, "listening");

        let (events_tx, events_rx) = channel::unbounded();
        spawn_accept_thread(listener, events_tx.clone());
        let signals_rx = spawn_signal_thread(self.logger.clone());

        let mut clients: HashMap<ClientId, Client> = HashMap::new();
        let mut next_id: ClientId = 0;

        loop {
            let idle = if clients.is_empty() {
                channel::after(self.idle_timeout)
            } else {
                channel::never()
            };

            channel::select! {
                recv(signals_rx) -> _ => {
                    info!(self.logger, "shutting down on signal");
                    self.shutdown(clients);
                    return Ok(());
                }
                recv(events_rx) -> event => {
                    match event {
                        Ok(Event::Accepted(stream)) => {
                            self.accept(stream, &events_tx, &mut clients, &mut next_id);
                        }
                        Ok(Event::Line(id, line)) => {
                            self.dispatch(id, &line, &mut clients);
                        }
                        Ok(Event::Closed(id)) => {
                            clients.remove(&id);
                            debug!(self.logger, "client disconnected"; "client" => id);
                        }
                        Err(_) => {
                            // Accept thread died; nothing more can happen.
                            self.shutdown(clients);
                            return Ok(());
                        }
                    }
                }
                recv(idle) -> _ => {
                    info!(self.logger, "idle timeout, exiting");
                    self.shutdown(clients);
                    return Ok(());
                }
            }
        }
    }

    fn accept(
        &mut self,
        stream: UnixStream,
        events_tx: &Sender<Event>,
        clients: &mut HashMap<ClientId, Client>,
        next_id: &mut ClientId,
    ) {
        let creds = match socket::peer_credentials(&stream) {
            Ok(c) => c,
            Err(e) => {
                warn!(self.logger, "failed to read peer credentials"; "error" => e.to_string());
                return;
            }
        };

        let id = *next_id;
        *next_id += 1;

        info!(self.logger, "client connected"; "client" => id, "pid" => creds.pid, "uid" => creds.uid);

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                warn!(self.logger, "failed to clone client stream"; "error" => e.to_string());
                return;
            }
        };
        spawn_reader_thread(id, reader_stream, events_tx.clone(), self.logger.clone());

        clients.insert(
            id,
            Client {
                stream,
                conn: Connection::new(self.family, creds.pid, creds.uid),
                framer: Framer::new(),
            },
        );
    }

    fn dispatch(&mut self, id: ClientId, line: &str, clients: &mut HashMap<ClientId, Client>) {
        let payload = match socket::parse_frame(line) {
            Some(parsed) => parsed,
            None => {
                warn!(self.logger, "discarding malformed line"; "client" => id);
                return;
            }
        };

        let outcome = {
            let client = match clients.get_mut(&id) {
                Some(c) => c,
                None => return,
            };
            client.conn.handle(payload, &mut self.cache, &mut self.worker)
        };

        let (replies, fanout) = match outcome {
            Ok(out) => (out.replies, out.fanout),
            Err(e) => (vec![format!("FAILURE/{}", e)], false),
        };

        self.write_replies(id, &replies, clients);

        if fanout {
            for (other_id, other) in clients.iter_mut() {
                if *other_id != id {
                    other.conn.invalidate();
                }
            }
        }
    }

    fn write_replies(&mut self, id: ClientId, replies: &[String], clients: &mut HashMap<ClientId, Client>) {
        let client = match clients.get_mut(&id) {
            Some(c) => c,
            None => return,
        };
        for reply in replies {
            let framed = client.framer.frame(reply);
            if let Err(e) = writeln!(client.stream, "{}", framed) {
                let clean = socket::is_clean_disconnect(&e);
                let err = Error::Socket(e);
                if !clean {
                    warn!(self.logger, "write failed"; "client" => id, "error" => err.to_string());
                }
            }
        }
    }

    fn shutdown(&mut self, clients: HashMap<ClientId, Client>) {
        for (_, client) in clients {
            let _ = client.stream.shutdown(std::net::Shutdown::Both);
        }
        let _ = self.worker.close(false);
    }
}

fn spawn_accept_thread(listener: UnixListener, events_tx: Sender<Event>) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    if events_tx.send(Event::Accepted(stream)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });
}

fn spawn_reader_thread(id: ClientId, stream: UnixStream, events_tx: Sender<Event>, logger: Logger) {
    thread::spawn(move || {
        let logger = logger.new(o!("client" => id));
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n').to_string();
                    if events_tx.send(Event::Line(id, trimmed)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let clean = socket::is_clean_disconnect(&e);
                    let err = crate::errors::Error::Socket(e);
                    if !clean {
                        debug!(logger, "read error"; "error" => err.to_string());
                    }
                    break;
                }
            }
        }
        let _ = events_tx.send(Event::Closed(id));
    });
}

/// Forwards `SIGTERM`/`SIGINT` onto a channel the main loop selects on,
/// so a graceful shutdown is just another event rather than a signal
/// handler mutating shared state directly.
fn spawn_signal_thread(logger: Logger) -> Receiver<()> {
    let (tx, rx) = channel::bounded(1);
    match Signals::new(&[signal_hook::SIGTERM, signal_hook::SIGINT]) {
        Ok(signals) => {
            thread::spawn(move || {
                for _ in signals.forever() {
                    let _ = tx.send(());
                    break;
                }
            });
        }
        Err(e) => {
            warn!(logger, "failed to install signal handler"; "error" => e.to_string());
        }
    }
    rx
}
