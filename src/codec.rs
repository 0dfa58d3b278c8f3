// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Shell-style tokenization shared by the cache's line dispatcher.
//!
//! Grounded in `yaa110-rust-iptables`'s `SplitQuoted` trait, which
//! tokenizes on whitespace while keeping quoted runs (containing
//! embedded spaces, e.g. a `--comment` value) intact. This stands in
//! for the original's `shlex.split`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RE_SPLIT: Regex = Regex::new(r#"["'].*?["']|[^ ]+"#).unwrap();
}

/// Splits a line into tokens, stripping a single layer of matching
/// quotes from any quoted run.
pub fn split_quoted(s: &str) -> Vec<String> {
    RE_SPLIT
        .find_iter(s)
        .map(|m| {
            let tok = m.as_str();
            let bytes = tok.as_bytes();
            if tok.len() >= 2
                && ((bytes[0] == b'"' && bytes[tok.len() - 1] == b'"')
                    || (bytes[0] == b'\'' && bytes[tok.len() - 1] == b'\''))
            {
                tok[1..tok.len() - 1].to_string()
            } else {
                tok.to_string()
            }
        })
        .collect()
}

/// Whether `tok` parses entirely as an unsigned integer (no sign, no
/// fractional part), used to detect an `-I`/`-D` position argument
/// ahead of the rule body.
pub fn parse_uint(tok: &str) -> Option<usize> {
    if tok.is_empty() || !tok.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tok.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bare_words() {
        assert_eq!(
            split_quoted("-A INPUT -s 10.0.0.0/8 -j ACCEPT"),
            vec!["-A", "INPUT", "-s", "10.0.0.0/8", "-j", "ACCEPT"]
        );
    }

    #[test]
    fn keeps_quoted_run_together() {
        assert_eq!(
            split_quoted(r#"-m comment --comment "hello world""#),
            vec!["-m", "comment", "--comment", "hello world"]
        );
    }

    #[test]
    fn recognizes_unsigned_integers_only() {
        assert_eq!(parse_uint("12"), Some(12));
        assert_eq!(parse_uint("-1"), None);
        assert_eq!(parse_uint("1.5"), None);
        assert_eq!(parse_uint("ACCEPT"), None);
    }
}
