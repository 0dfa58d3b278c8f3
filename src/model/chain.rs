// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! `Chain`: an ordered rule list under a policy, and the token-level
//! rule-tail grammar (`Chain::parse_rule_tail`), grounded in
//! `original_source/src/__init__.py`'s `Chain.deserialize`.

use crate::errors::{Error, Result};
use super::rule::{AttrKind, Goto, Match, Rule, Target, Verdict};
use super::Validity;

/// A chain's default verdict for packets that fall off the end of it.
/// Only base chains (`INPUT`, `OUTPUT`, `FORWARD`, ...) carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Accept,
    Drop,
    Queue,
    Return,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Accept => "ACCEPT",
            Policy::Drop => "DROP",
            Policy::Queue => "QUEUE",
            Policy::Return => "RETURN",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACCEPT" => Ok(Policy::Accept),
            "DROP" => Ok(Policy::Drop),
            "QUEUE" => Ok(Policy::Queue),
            "RETURN" => Ok(Policy::Return),
            other => Err(Error::Parse {
                context: "chain policy".to_string(),
                message: format!("unrecognized policy '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chain {
    pub name: String,
    /// `None` for user-defined chains, which have no default verdict.
    pub policy: Option<Policy>,
    pub rules: Vec<Rule>,
    pub(crate) validity: Validity,
}

const OBJECT_OPTS: [&str; 3] = ["-m", "-j", "-g"];

impl Chain {
    pub fn new(name: impl Into<String>, policy: Option<Policy>) -> Self {
        Chain {
            name: name.into(),
            policy,
            rules: Vec::new(),
            validity: Validity::default(),
        }
    }

    pub fn append_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Inserts at a 1-based position, per the save/restore grammar.
    pub fn insert_rule(&mut self, rule: Rule, pos: usize) -> Result<()> {
        if pos == 0 || pos > self.rules.len() + 1 {
            return Err(Error::Parse {
                context: format!("chain {}", self.name),
                message: format!("insert position {} out of range", pos),
            });
        }
        self.rules.insert(pos - 1, rule);
        Ok(())
    }

    /// Removes the rule at a 1-based position.
    pub fn delete_rule_at(&mut self, pos: usize) -> Result<Rule> {
        if pos == 0 || pos > self.rules.len() {
            return Err(Error::Parse {
                context: format!("chain {}", self.name),
                message: format!("delete position {} out of range", pos),
            });
        }
        Ok(self.rules.remove(pos - 1))
    }

    /// Removes the first rule equal by value to `rule`.
    pub fn delete_rule_matching(&mut self, rule: &Rule) -> Result<()> {
        let idx = self
            .rules
            .iter()
            .position(|r| r == rule)
            .ok_or_else(|| Error::Parse {
                context: format!("chain {}", self.name),
                message: "no matching rule to delete".to_string(),
            })?;
        self.rules.remove(idx);
        Ok(())
    }

    /// Serializes the chain's header line (`:name policy [0:0]`).
    pub fn serialize_header(&self) -> String {
        match self.policy {
            Some(policy) => format!(":{} {} [0:0]", self.name, policy.as_str()),
            None => format!(":{} - [0:0]", self.name),
        }
    }

    /// Serializes every rule in this chain as `-A <chain> <tail>` lines.
    pub fn serialize_rules(&self) -> Vec<String> {
        self.rules
            .iter()
            .map(|r| {
                let tail = r.serialize_line();
                if tail.is_empty() {
                    format!("-A {}", self.name)
                } else {
                    format!("-A {} {}", self.name, tail)
                }
            })
            .collect()
    }

    /// Parses the tokens following `-A`/`-I <chain> [pos]`/`-D <chain>
    /// [pos]` into a `Rule`. `tokens` must already be shell-tokenized
    /// (quotes stripped) by the codec's splitter.
    pub fn parse_rule_tail(tokens: &[String]) -> Result<Rule> {
        let mut rule = Rule::new();
        let mut i = 0;
        let mut revopt = false;

        while i < tokens.len() {
            let tok = tokens[i].as_str();

            if tok == "!" {
                revopt = true;
                i += 1;
                continue;
            }

            if OBJECT_OPTS.contains(&tok) {
                let reverse = revopt;
                revopt = false;
                // Bound the object block: everything up to the next
                // top-level object-introducing token (or end).
                let mut end = i + 2;
                while end < tokens.len() && !OBJECT_OPTS.contains(&tokens[end].as_str()) {
                    end += 1;
                }
                if i + 1 >= tokens.len() {
                    return Err(Error::Parse {
                        context: "rule".to_string(),
                        message: format!("{} with no name", tok),
                    });
                }
                let name = tokens[i + 1].clone();
                let block = &tokens[i + 2..end];

                match tok {
                    "-m" => {
                        let mut m = Match::new(name, reverse);
                        parse_param_block(block, &mut |k, v| m.set(k, v));
                        rule.matches.push(m);
                    }
                    "-j" => {
                        let mut t = Target::new(name);
                        parse_param_block(block, &mut |k, v| t.set(k, v));
                        rule.verdict = Some(Verdict::Target(t));
                    }
                    "-g" => {
                        let mut g = Goto::new(name);
                        parse_param_block(block, &mut |k, v| g.set(k, v));
                        rule.verdict = Some(Verdict::Goto(g));
                    }
                    _ => unreachable!(),
                }

                i = end;
                continue;
            }

            if let Some(kind) = AttrKind::from_opt(tok) {
                let value = tokens.get(i + 1).cloned().ok_or_else(|| Error::Parse {
                    context: "rule".to_string(),
                    message: format!("{} with no value", tok),
                })?;
                let value = if revopt {
                    format!("! {}", value)
                } else {
                    value
                };
                revopt = false;
                rule.set_attr(kind, value);
                i += 2;
                continue;
            }

            return Err(Error::Parse {
                context: "rule".to_string(),
                message: format!("unrecognized token '{}'", tok),
            });
        }

        Ok(rule)
    }
}

/// Parses a `--key value ... --key2 value2 ...` run within a match/
/// target block, honoring `!` negation immediately preceding a key.
fn parse_param_block(block: &[String], set: &mut dyn FnMut(&str, String)) {
    let mut i = 0;
    let mut revopt = false;
    while i < block.len() {
        let tok = block[i].as_str();
        if tok == "!" {
            revopt = true;
            i += 1;
            continue;
        }
        if let Some(key) = tok.strip_prefix("--") {
            let mut j = i + 1;
            let mut values = Vec::new();
            while j < block.len() && !block[j].starts_with("--") && block[j] != "!" {
                values.push(block[j].clone());
                j += 1;
            }
            let value = values.join(" ");
            let value = if revopt { format!("! {}", value) } else { value };
            revopt = false;
            set(key, value);
            i = j;
            continue;
        }
        // Stray token with no `--key`; skip it defensively.
        i += 1;
    }
}
