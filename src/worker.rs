// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Owns the load-utility and save/restore-utility subprocess
//! invocations for one address family.
//!
//! Grounded in `original_source/src/server.py`'s `WorkerInstance`: the
//! load utility (`iptables-save`/`ip6tables-save`) is a short-lived
//! child run to completion per `load()` call; the save utility
//! (`iptables-restore -n`/`ip6tables-restore -n`) is a long-lived
//! child whose stdin is written to incrementally across commits and
//! only closed on `close`/`restart`, matching `dfw`'s
//! `IPTablesRestore::commit` subprocess-spawning style.

use std::io::Write;
use std::process::{Child, Command, ExitStatus, Stdio};

use slog::{o, warn, Logger};

use crate::errors::{Error, Result};
use crate::model::AddressFamily;

pub struct Worker {
    family: AddressFamily,
    load_command: Vec<String>,
    save_command: Vec<String>,
    child: Option<Child>,
    logger: Logger,
}

impl Worker {
    pub fn new(
        family: AddressFamily,
        load_command: Vec<String>,
        save_command: Vec<String>,
        logger: Logger,
    ) -> Self {
        Worker {
            logger: logger.new(o!("family" => family.as_str())),
            family,
            load_command,
            save_command,
            child: None,
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    fn spawn(argv: &[String], stdin: Stdio, stdout: Stdio) -> Result<Child> {
        Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Subprocess {
                command: argv.join(" "),
                message: e.to_string(),
            })
    }

    /// Runs the load utility to completion and returns its stdout as
    /// save-format lines.
    pub fn load(&mut self) -> Result<Vec<String>> {
        let argv = self.load_command.clone();
        let child = Self::spawn(&argv, Stdio::null(), Stdio::piped())?;
        let output = child.wait_with_output().map_err(|e| Error::Subprocess {
            command: argv.join(" "),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(Error::Subprocess {
                command: argv.join(" "),
                message: format!("exited with {}", output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.to_string())
            .collect())
    }

    fn ensure_started(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let argv = self.save_command.clone();
        self.child = Some(Self::spawn(&argv, Stdio::piped(), Stdio::null())?);
        Ok(())
    }

    /// Writes one commit's worth of save-format lines (already
    /// including each table's header and trailing `COMMIT`) to the
    /// restore utility's stdin, followed by the `# COMMIT VALIDATION`
    /// sentinel comment spec'd as the wire terminator, lazily spawning
    /// the process first if needed.
    pub fn commit(&mut self, lines: &[String]) -> Result<()> {
        self.ensure_started()?;
        let command = self.save_command.join(" ");
        {
            let child = self.child.as_mut().expect("ensure_started");
            let stdin = child.stdin.as_mut().ok_or_else(|| Error::Subprocess {
                command: command.clone(),
                message: "restore process has no stdin".to_string(),
            })?;
            for line in lines {
                writeln!(stdin, "{}", line).map_err(|e| Error::Subprocess {
                    command: command.clone(),
                    message: e.to_string(),
                })?;
            }
            writeln!(stdin, "# COMMIT VALIDATION").map_err(|e| Error::Subprocess {
                command: command.clone(),
                message: e.to_string(),
            })?;
            stdin.flush().map_err(|e| Error::Subprocess {
                command: command.clone(),
                message: e.to_string(),
            })?;
        }
        if let Some(status) = self.poll()? {
            self.child = None;
            return Err(Error::Subprocess {
                command,
                message: format!("restore process exited with {}", status),
            });
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait().map_err(Error::from),
            None => Ok(None),
        }
    }

    /// Closes the restore process's stdin and waits for it to exit,
    /// logging a non-zero exit unless `failed` says the caller already
    /// knows this commit failed. A no-op if nothing is running.
    pub fn close(&mut self, failed: bool) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            drop(child.stdin.take());
            let status = child.wait().map_err(Error::from)?;
            if !status.success() && !failed {
                warn!(self.logger, "restore process exited non-zero on close"; "status" => status.to_string());
            }
        }
        Ok(())
    }

    /// Discards the current restore process, if any. `commit` respawns
    /// one lazily on next use. Used after an I/O failure and on the
    /// `boot` connection state's reset.
    pub fn restart(&mut self) -> Result<()> {
        self.close(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Discard;

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn load_runs_utility_and_splits_stdout() {
        let mut worker = Worker::new(
            AddressFamily::V4,
            vec!["/bin/echo".to_string(), "*filter".to_string()],
            vec!["/bin/cat".to_string()],
            logger(),
        );
        let lines = worker.load().unwrap();
        assert_eq!(lines, vec!["*filter".to_string()]);
    }

    #[test]
    fn load_surfaces_nonzero_exit() {
        let mut worker = Worker::new(
            AddressFamily::V4,
            vec!["/bin/false".to_string()],
            vec!["/bin/cat".to_string()],
            logger(),
        );
        assert!(worker.load().is_err());
    }

    #[test]
    fn commit_writes_to_long_lived_process() {
        let mut worker = Worker::new(
            AddressFamily::V4,
            vec!["/bin/echo".to_string()],
            vec!["/bin/cat".to_string()],
            logger(),
        );
        worker.commit(&["*filter".to_string(), "COMMIT".to_string()]).unwrap();
        worker.close(false).unwrap();
    }
}
