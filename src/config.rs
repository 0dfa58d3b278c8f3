// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! TOML configuration file + environment overrides.
//!
//! Grounded in `dfw`'s config convention (`toml` + `serde_derive`,
//! resolved into a `derive_builder`-built `Config`) and
//! `original_source/src/server.py`'s `Server.initialize`, which reads
//! an INI file with `[default]`/`[ipv4]`/`[ipv6]` sections via a
//! `safeget` helper that falls back to a built-in default and logs a
//! warning on any malformed value, rather than aborting startup. TOML
//! sections are the natural equivalent of the original's INI sections
//! here, using the crate the teacher already depends on.

use std::fs;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde_derive::Deserialize;
use slog::{warn, Logger};

use crate::model::AddressFamily;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/pytables/server.conf";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct Config {
    pub family: AddressFamily,
    pub debug: bool,
    pub log_to_disk: Option<PathBuf>,
    pub log_to_console: bool,
    pub load_command: Vec<String>,
    pub save_command: Vec<String>,
    pub idle_timeout_secs: u64,
}

impl Config {
    /// Built-in defaults for `family`, used when no config file, no
    /// matching section, or no override key is present.
    pub fn defaults(family: AddressFamily) -> Self {
        Config {
            family,
            debug: false,
            log_to_disk: None,
            log_to_console: true,
            load_command: family.default_load_command(),
            save_command: family.default_save_command(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawSection {
    debug: Option<toml::Value>,
    log_to_disk: Option<String>,
    log_to_console: Option<bool>,
    load_command: Option<Vec<String>>,
    save_command: Option<Vec<String>>,
    idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    default: Option<RawSection>,
    ipv4: Option<RawSection>,
    ipv6: Option<RawSection>,
}

fn apply_section(logger: &Logger, config: &mut Config, section: &RawSection) {
    if let Some(value) = &section.debug {
        match toml::from_value::<bool>(value.clone()) {
            Ok(debug) => config.debug = debug,
            Err(_) => warn!(logger, "ignoring malformed 'debug' value, keeping default"; "value" => format!("{:?}", value)),
        }
    }
    if let Some(path) = &section.log_to_disk {
        config.log_to_disk = Some(PathBuf::from(path));
    }
    if let Some(v) = section.log_to_console {
        config.log_to_console = v;
    }
    if let Some(v) = &section.load_command {
        config.load_command = v.clone();
    }
    if let Some(v) = &section.save_command {
        config.save_command = v.clone();
    }
    if let Some(v) = section.idle_timeout_secs {
        config.idle_timeout_secs = v;
    }
}

/// Loads and resolves the config for `family`. A missing file is not
/// an error — it is treated the same as an empty one. A present but
/// unparsable file is a hard error (`Error::Config`); this lives in
/// `errors.rs`'s `From<toml::de::Error>` impl and propagates out of
/// `main` at startup, distinct from a single malformed *value*, which
/// only logs and falls back.
pub fn load(logger: &Logger, path: &Path, family: AddressFamily) -> crate::errors::Result<Config> {
    let mut config = Config::defaults(family);

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Ok(apply_env_override(config)),
    };

    let raw: RawConfig = toml::from_str(&text)?;

    if let Some(section) = &raw.default {
        apply_section(logger, &mut config, section);
    }
    let family_section = match family {
        AddressFamily::V4 => &raw.ipv4,
        AddressFamily::V6 => &raw.ipv6,
    };
    if let Some(section) = family_section {
        apply_section(logger, &mut config, section);
    }

    Ok(apply_env_override(config))
}

/// `PYTABLES_DEBUG` (`0`/`1`), when set, takes precedence over both
/// the built-in default and the config file's `debug` key.
fn apply_env_override(mut config: Config) -> Config {
    match std::env::var("PYTABLES_DEBUG").as_deref() {
        Ok("1") => config.debug = true,
        Ok("0") => config.debug = false,
        _ => {}
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{o, Discard};

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load(&logger(), Path::new("/nonexistent/pytables.conf"), AddressFamily::V4).unwrap();
        assert_eq!(config.idle_timeout_secs, DEFAULT_IDLE_TIMEOUT_SECS);
        assert_eq!(config.load_command, AddressFamily::V4.default_load_command());
    }

    #[test]
    fn family_section_overrides_default_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.conf");
        fs::write(
            &path,
            r#"
            [default]
            idle_timeout_secs = 9

            [ipv6]
            idle_timeout_secs = 20
            "#,
        )
        .unwrap();

        let v4 = load(&logger(), &path, AddressFamily::V4).unwrap();
        assert_eq!(v4.idle_timeout_secs, 9);

        let v6 = load(&logger(), &path, AddressFamily::V6).unwrap();
        assert_eq!(v6.idle_timeout_secs, 20);
    }

    #[test]
    fn malformed_debug_value_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.conf");
        fs::write(&path, "[default]\ndebug = \"not-a-bool\"\n").unwrap();

        let config = load(&logger(), &path, AddressFamily::V4).unwrap();
        assert_eq!(config.debug, false);
    }
}
