// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! `Rule` and the match/target/goto objects it carries.
//!
//! Negation is folded into the stored value string: a negated attribute
//! or parameter is stored as `"! <value>"`, mirroring
//! `original_source`'s `rev_value` helper. This keeps `Rule`/`Match`
//! equality a plain value comparison instead of needing a parallel set
//! of `bool` negation flags per field.

use std::collections::HashMap;

use super::Validity;

/// The five generic rule attributes every `Rule` may carry, independent
/// of any `-m`/`-j`/`-g` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    Src,
    Dst,
    InInterface,
    OutInterface,
    Protocol,
}

impl AttrKind {
    /// Long-form option used on *output*; the codec accepts both short
    /// and long forms on input but always normalizes to this on
    /// serialization, matching `original_source`'s `attributes()`.
    pub fn long_opt(self) -> &'static str {
        match self {
            AttrKind::Src => "--src",
            AttrKind::Dst => "--dst",
            AttrKind::InInterface => "--in-interface",
            AttrKind::OutInterface => "--out-interface",
            AttrKind::Protocol => "--protocol",
        }
    }

    /// Maps an input token (short or long form) to the attribute it
    /// sets, per spec's token-grammar table. Note this deliberately
    /// does *not* reproduce `original_source`'s `-d`/`--dst` -> `src`
    /// mapping, which looks like a transcription bug in the Python;
    /// the grammar table is followed instead (see DESIGN.md).
    pub fn from_opt(opt: &str) -> Option<Self> {
        match opt {
            "-s" | "--src" | "--source" => Some(AttrKind::Src),
            "-d" | "--dst" | "--destination" => Some(AttrKind::Dst),
            "-i" | "--in-interface" => Some(AttrKind::InInterface),
            "-o" | "--out-interface" => Some(AttrKind::OutInterface),
            "-p" | "--protocol" | "--proto" => Some(AttrKind::Protocol),
            _ => None,
        }
    }
}

/// Emits a `--flag[ value]` token pair into `out`, handling the
/// negation-prefix and empty-value (bare flag) cases shared by every
/// attribute/parameter container.
fn emit_attr(out: &mut Vec<String>, flag: &str, value: &str) {
    let (negated, value) = match value.strip_prefix("! ") {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    if negated {
        out.push("!".to_string());
    }
    out.push(flag.to_string());
    if !value.is_empty() {
        out.push(value.to_string());
    }
}

/// A `-m <name> [--key value ...]` match object attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub name: String,
    pub reverse: bool,
    params: Vec<(String, String)>,
}

impl Match {
    pub fn new(name: impl Into<String>, reverse: bool) -> Self {
        Match {
            name: name.into(),
            reverse,
            params: Vec::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(slot) = self.params.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value.into();
        } else {
            self.params.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn serialize(&self, out: &mut Vec<String>) {
        if self.reverse {
            out.push("!".to_string());
        }
        out.push("-m".to_string());
        out.push(self.name.clone());
        for (key, value) in &self.params {
            emit_attr(out, &format!("--{}", key), value);
        }
    }
}

/// A `-j <NAME> [--key value ...]` target, or `-g <chain>` goto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    params: Vec<(String, String)>,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Target {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// A target whose name is fully upper-case is a built-in verdict
    /// (`ACCEPT`, `DROP`, ...) rather than a user-defined chain jump.
    pub fn is_standard(&self) -> bool {
        self.name == self.name.to_uppercase()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(slot) = self.params.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value.into();
        } else {
            self.params.push((key, value.into()));
        }
    }

    pub fn serialize(&self, out: &mut Vec<String>) {
        out.push("-j".to_string());
        out.push(self.name.clone());
        for (key, value) in &self.params {
            emit_attr(out, &format!("--{}", key), value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goto {
    pub chain: String,
    params: Vec<(String, String)>,
}

impl Goto {
    pub fn new(chain: impl Into<String>) -> Self {
        Goto {
            chain: chain.into(),
            params: Vec::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if let Some(slot) = self.params.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value.into();
        } else {
            self.params.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn serialize(&self, out: &mut Vec<String>) {
        out.push("-g".to_string());
        out.push(self.chain.clone());
        for (key, value) in &self.params {
            emit_attr(out, &format!("--{}", key), value);
        }
    }
}

/// A rule's terminating object: at most one of `-j`/`-g` may be
/// present, and the grammar never allows both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Target(Target),
    Goto(Goto),
}

impl Verdict {
    fn serialize(&self, out: &mut Vec<String>) {
        match self {
            Verdict::Target(t) => t.serialize(out),
            Verdict::Goto(g) => g.serialize(out),
        }
    }
}

/// A single rule line (`-A`/`-I`/`-D <chain> ...`), independent of the
/// position it was inserted/deleted at — position is a chain-level
/// concern, not part of the rule's own identity.
#[derive(Debug, Clone)]
pub struct Rule {
    order: Vec<AttrKind>,
    attrs: HashMap<AttrKind, String>,
    pub matches: Vec<Match>,
    pub verdict: Option<Verdict>,
    pub(crate) validity: Validity,
}

/// Rules compare equal by their serialized content alone; the
/// reload-bookkeeping `validity` flag is not part of a rule's value.
impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.attrs == other.attrs && self.matches == other.matches && self.verdict == other.verdict
    }
}

impl Eq for Rule {}

impl Default for Rule {
    fn default() -> Self {
        Rule {
            order: Vec::new(),
            attrs: HashMap::new(),
            matches: Vec::new(),
            verdict: None,
            validity: Validity::default(),
        }
    }
}

impl Rule {
    pub fn new() -> Self {
        Rule::default()
    }

    /// Sets a generic attribute. `value` may carry the `"! "` negation
    /// prefix. First assignment fixes the attribute's position in the
    /// serialized token order.
    pub fn set_attr(&mut self, kind: AttrKind, value: impl Into<String>) {
        if !self.attrs.contains_key(&kind) {
            self.order.push(kind);
        }
        self.attrs.insert(kind, value.into());
    }

    pub fn attr(&self, kind: AttrKind) -> Option<&str> {
        self.attrs.get(&kind).map(|s| s.as_str())
    }

    /// Token-level serialization of this rule's body (everything after
    /// `-A <chain>`): generic attributes in assignment order, then
    /// matches in attachment order, then the verdict if any.
    pub fn serialize(&self) -> Vec<String> {
        let mut out = Vec::new();
        for kind in &self.order {
            let value = &self.attrs[kind];
            emit_attr(&mut out, kind.long_opt(), value);
        }
        for m in &self.matches {
            m.serialize(&mut out);
        }
        if let Some(verdict) = &self.verdict {
            verdict.serialize(&mut out);
        }
        out
    }

    pub fn serialize_line(&self) -> String {
        self.serialize().join(" ")
    }
}
