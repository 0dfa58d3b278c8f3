// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Per-family registry of `Table`s, and the reload-diff `load`/`save`
//! pair that is the daemon's sole interface to the in-memory model.
//!
//! Grounded in `original_source/src/__init__.py`'s `IptcCache`
//! classmethods, reworked from a process-wide class-level registry
//! into an owned, per-`Cache`-instance one per the "no statics" design
//! note: each connection/worker holds a reference to the one `Cache`
//! the daemon constructs at startup, not a global.

use crate::codec::{parse_uint, split_quoted};
use crate::errors::{Error, Result};
use crate::model::chain::{Chain, Policy};
use crate::model::table::Table;
use crate::model::{AddressFamily, Validity};

#[derive(Debug, Default)]
pub struct Cache {
    v4: Vec<Table>,
    v6: Vec<Table>,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            v4: Vec::new(),
            v6: Vec::new(),
        }
    }

    fn tables(&self, family: AddressFamily) -> &Vec<Table> {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    fn tables_mut(&mut self, family: AddressFamily) -> &mut Vec<Table> {
        match family {
            AddressFamily::V4 => &mut self.v4,
            AddressFamily::V6 => &mut self.v6,
        }
    }

    pub fn table(&self, family: AddressFamily, name: &str) -> Option<&Table> {
        self.tables(family).iter().find(|t| t.name == name)
    }

    /// Factory lookup: returns the existing table, or creates one.
    /// Tables are never removed by a reload, per `original_source`.
    pub fn get_or_create_table(&mut self, family: AddressFamily, name: &str) -> &mut Table {
        let tables = self.tables_mut(family);
        if let Some(idx) = tables.iter().position(|t| t.name == name) {
            return &mut tables[idx];
        }
        tables.push(Table::new(name));
        tables.last_mut().expect("just pushed")
    }

    /// Applies `lines` (save/restore-format text) to this family's
    /// state.
    ///
    /// When `reloading` is true this runs the full mark/parse/sweep
    /// diff: every existing chain is first marked `Invalid` and
    /// emptied, then every chain header and rule line seen in `lines`
    /// flips its chain back to `Valid` and repopulates its rules, and
    /// finally every chain still `Invalid` is dropped. Rules parsed
    /// while `reloading` is false (an incremental client `COMMIT`) are
    /// simply merged in — nothing is marked or swept, matching the
    /// original's `reloading=False` path used when replaying a
    /// client's own committed restore text back into the cache.
    pub fn load(&mut self, family: AddressFamily, lines: &[String], reloading: bool) -> Result<()> {
        if reloading {
            for table in self.tables_mut(family).iter_mut() {
                for chain in table.chains.iter_mut() {
                    chain.validity = Validity::Invalid;
                    chain.rules.clear();
                }
            }
        }

        let mut current_table: Option<String> = None;

        for raw in lines {
            let line = raw.trim_end();
            if line.is_empty() || line.starts_with('#') || line == "COMMIT" {
                continue;
            }

            if let Some(name) = line.strip_prefix('*') {
                self.get_or_create_table(family, name);
                current_table = Some(name.to_string());
                continue;
            }

            if let Some(rest) = line.strip_prefix(':') {
                let table_name = current_table.clone().ok_or_else(|| Error::Parse {
                    context: "chain header".to_string(),
                    message: "chain header seen before any table header".to_string(),
                })?;
                let tokens = split_quoted(rest);
                if tokens.len() < 2 {
                    return Err(Error::Parse {
                        context: "chain header".to_string(),
                        message: format!("malformed header ':{}'", rest),
                    });
                }
                if let Some(counters) = tokens.get(2) {
                    if !(counters.starts_with('[') && counters.ends_with(']') && counters.contains(':'))
                    {
                        return Err(Error::Parse {
                            context: "chain header".to_string(),
                            message: format!("malformed counters '{}'", counters),
                        });
                    }
                }
                let policy = if tokens[1] == "-" {
                    None
                } else {
                    Some(Policy::parse(&tokens[1])?)
                };
                let table = self.get_or_create_table(family, &table_name);
                let chain = table.get_or_create_chain(&tokens[0], policy);
                chain.policy = policy;
                if reloading {
                    chain.validity = Validity::Valid;
                }
                continue;
            }

            let tokens = split_quoted(line);
            let op = match tokens.first() {
                Some(op) => op.clone(),
                None => continue,
            };
            if op != "-A" && op != "-I" && op != "-D" {
                return Err(Error::Parse {
                    context: "rule line".to_string(),
                    message: format!("unrecognized directive '{}'", op),
                });
            }
            let table_name = current_table.clone().ok_or_else(|| Error::Parse {
                context: "rule line".to_string(),
                message: "rule line seen before any table header".to_string(),
            })?;
            let chain_name = tokens.get(1).cloned().ok_or_else(|| Error::Parse {
                context: "rule line".to_string(),
                message: format!("{} with no chain name", op),
            })?;

            let mut idx = 2;
            let mut pos = None;
            if let Some(tok) = tokens.get(idx) {
                if let Some(n) = parse_uint(tok) {
                    pos = Some(n);
                    idx += 1;
                }
            }
            let tail = &tokens[idx..];

            let table = self.get_or_create_table(family, &table_name);
            match op.as_str() {
                "-A" => {
                    let mut rule = Chain::parse_rule_tail(tail)?;
                    rule.validity = Validity::Valid;
                    let chain = table.get_or_create_chain(&chain_name, None);
                    chain.append_rule(rule);
                }
                "-I" => {
                    let mut rule = Chain::parse_rule_tail(tail)?;
                    rule.validity = Validity::Valid;
                    let chain = table.get_or_create_chain(&chain_name, None);
                    // spec.md §4.1: a position-less `-I` appends
                    // (`original_source` itself defaults to position 1,
                    // but the spec is authoritative here — see DESIGN.md).
                    let default_pos = chain.rules.len() + 1;
                    chain.insert_rule(rule, pos.unwrap_or(default_pos))?;
                }
                "-D" => {
                    let chain = table.get_or_create_chain(&chain_name, None);
                    if let Some(p) = pos {
                        chain.delete_rule_at(p)?;
                    } else {
                        let rule = Chain::parse_rule_tail(tail)?;
                        chain.delete_rule_matching(&rule)?;
                    }
                }
                _ => unreachable!(),
            }
        }

        if reloading {
            for table in self.tables_mut(family).iter_mut() {
                table.chains.retain(|c| c.validity != Validity::Invalid);
            }
        }

        Ok(())
    }

    /// Dumps every table in this family as save-format text, in the
    /// same `*table` / `:chain policy [0:0]` / `-A ...` / `COMMIT`
    /// shape the load side accepts.
    pub fn save(&self, family: AddressFamily) -> Vec<String> {
        let mut out = Vec::new();
        for table in self.tables(family) {
            out.extend(table.serialize());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn round_trip_preserves_rules() {
        let mut cache = Cache::new();
        let text = lines(
            "*filter\n:INPUT ACCEPT [0:0]\n:FORWARD DROP [0:0]\n\
             -A INPUT -s 10.0.0.0/8 -j ACCEPT\n-A INPUT -p tcp -m tcp --dport 22 -j ACCEPT\nCOMMIT",
        );
        cache.load(AddressFamily::V4, &text, true).unwrap();

        let table = cache.table(AddressFamily::V4, "filter").unwrap();
        let input = table.chain("INPUT").unwrap();
        assert_eq!(input.rules.len(), 2);
        assert_eq!(input.policy, Some(Policy::Accept));

        let dumped = cache.save(AddressFamily::V4);
        let mut cache2 = Cache::new();
        cache2.load(AddressFamily::V4, &dumped, true).unwrap();
        assert_eq!(
            cache2.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").unwrap().rules,
            cache.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").unwrap().rules,
        );
    }

    #[test]
    fn reload_drops_chains_missing_from_new_text() {
        let mut cache = Cache::new();
        cache
            .load(
                AddressFamily::V4,
                &lines("*filter\n:INPUT ACCEPT [0:0]\n:OLDCHAIN - [0:0]\nCOMMIT"),
                true,
            )
            .unwrap();
        assert!(cache.table(AddressFamily::V4, "filter").unwrap().chain("OLDCHAIN").is_some());

        cache
            .load(AddressFamily::V4, &lines("*filter\n:INPUT ACCEPT [0:0]\nCOMMIT"), true)
            .unwrap();
        let table = cache.table(AddressFamily::V4, "filter").unwrap();
        assert!(table.chain("OLDCHAIN").is_none());
        assert!(table.chain("INPUT").is_some());
    }

    #[test]
    fn incremental_load_does_not_sweep() {
        let mut cache = Cache::new();
        cache
            .load(
                AddressFamily::V4,
                &lines("*filter\n:INPUT ACCEPT [0:0]\n:KEEPME - [0:0]\nCOMMIT"),
                true,
            )
            .unwrap();
        cache
            .load(
                AddressFamily::V4,
                &lines("*filter\n-A INPUT -s 1.2.3.4 -j DROP\nCOMMIT"),
                false,
            )
            .unwrap();
        let table = cache.table(AddressFamily::V4, "filter").unwrap();
        assert!(table.chain("KEEPME").is_some());
        assert_eq!(table.chain("INPUT").unwrap().rules.len(), 1);
    }

    #[test]
    fn negation_round_trips_to_an_equal_rule() {
        let mut cache = Cache::new();
        cache
            .load(
                AddressFamily::V4,
                &lines(
                    "*filter\n:OUTPUT ACCEPT [0:0]\n\
                     -A OUTPUT ! -p tcp -m tcp ! --dport 22 -j ACCEPT\nCOMMIT",
                ),
                true,
            )
            .unwrap();
        let rule = cache.table(AddressFamily::V4, "filter").unwrap().chain("OUTPUT").unwrap().rules[0]
            .clone();

        let tail = split_quoted(&rule.serialize_line());
        let reparsed = Chain::parse_rule_tail(&tail).unwrap();
        assert_eq!(rule.attr(crate::model::AttrKind::Protocol), Some("! tcp"));
        assert_eq!(reparsed.attr(crate::model::AttrKind::Protocol), Some("! tcp"));
        assert_eq!(reparsed.matches[0].get("dport"), Some("! 22"));
    }

    #[test]
    fn insert_with_no_position_appends() {
        let mut cache = Cache::new();
        cache
            .load(
                AddressFamily::V4,
                &lines("*filter\n:INPUT ACCEPT [0:0]\n-A INPUT -s 1.1.1.1 -j ACCEPT\nCOMMIT"),
                true,
            )
            .unwrap();
        cache
            .load(AddressFamily::V4, &lines("*filter\n-I INPUT -s 2.2.2.2 -j ACCEPT\nCOMMIT"), false)
            .unwrap();
        let chain = cache.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").unwrap();
        assert_eq!(chain.rules.len(), 2);
        assert_eq!(chain.rules[0].attr(crate::model::AttrKind::Src), Some("1.1.1.1"));
        assert_eq!(chain.rules[1].attr(crate::model::AttrKind::Src), Some("2.2.2.2"));
    }

    #[test]
    fn delete_by_position_removes_nth_rule() {
        let mut cache = Cache::new();
        cache
            .load(
                AddressFamily::V4,
                &lines(
                    "*filter\n:INPUT ACCEPT [0:0]\n\
                     -A INPUT -s 1.1.1.1 -j ACCEPT\n-A INPUT -s 2.2.2.2 -j ACCEPT\nCOMMIT",
                ),
                true,
            )
            .unwrap();
        cache
            .load(AddressFamily::V4, &lines("*filter\n-D INPUT 1\nCOMMIT"), false)
            .unwrap();
        let chain = cache.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").unwrap();
        assert_eq!(chain.rules.len(), 1);
        assert_eq!(chain.rules[0].attr(crate::model::AttrKind::Src), Some("2.2.2.2"));
    }
}
