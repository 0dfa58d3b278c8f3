// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! `Table`: a named collection of chains (`filter`, `nat`, `mangle`,
//! ...). Tables carry no validity flag of their own — the reload-diff
//! sweep in `Cache::load` only ever removes chains and rules, never
//! tables, matching `original_source`.

use super::chain::Chain;

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub chains: Vec<Chain>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            chains: Vec::new(),
        }
    }

    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name == name)
    }

    pub fn chain_mut(&mut self, name: &str) -> Option<&mut Chain> {
        self.chains.iter_mut().find(|c| c.name == name)
    }

    /// Factory lookup: returns the existing chain by name, or creates
    /// and appends a new one. Mirrors `original_source`'s cache-backed
    /// `Chain.__new__`, scoped to this table instead of a process-wide
    /// registry.
    pub fn get_or_create_chain(&mut self, name: &str, policy: Option<super::Policy>) -> &mut Chain {
        if let Some(idx) = self.chains.iter().position(|c| c.name == name) {
            return &mut self.chains[idx];
        }
        self.chains.push(Chain::new(name, policy));
        self.chains.last_mut().expect("just pushed")
    }

    /// Serializes this table's `*name`, chain headers and rules, in
    /// the order `original_source`'s `IptcBaseTable.dump` produces:
    /// every chain header first, then every chain's rules. No trailing
    /// `COMMIT` — that belongs to the restore-utility wire format
    /// (`Worker::commit` adds one per table it writes), not to a cache
    /// dump handed back to a client on `LOAD`.
    pub fn serialize(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.chains.len() * 2);
        out.push(format!("*{}", self.name));
        for chain in &self.chains {
            out.push(chain.serialize_header());
        }
        for chain in &self.chains {
            out.extend(chain.serialize_rules());
        }
        out
    }
}
