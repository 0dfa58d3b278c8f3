// Copyright 2014 Sangoma Technologies Corp.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Crate-level end-to-end scenarios from spec.md §8, driven through the
//! public `Cache`/`Connection`/`Worker`/`socket::Framer` API with stub
//! load/save commands (`/bin/sh -c ...`) standing in for
//! `iptables-save`/`iptables-restore`.

use pytables::cache::Cache;
use pytables::connection::Connection;
use pytables::model::AddressFamily;
use pytables::socket::Framer;
use pytables::worker::Worker;

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

/// Scenario 1: empty LOAD. The load utility reports a filter table with
/// no rules; the server's reply is the dumped cache lines, each framed,
/// followed by a framed `OK`.
#[test]
fn empty_load_reply_is_framed_dump_then_ok() {
    let mut cache = Cache::new();
    let mut worker = Worker::new(
        AddressFamily::V4,
        sh("printf '*filter\\n:INPUT ACCEPT [0:0]\\n:FORWARD ACCEPT [0:0]\\n:OUTPUT ACCEPT [0:0]\\nCOMMIT\\n'"),
        sh("cat >/dev/null"),
        logger(),
    );
    let mut conn = Connection::new(AddressFamily::V4, 1, 1);

    let out = conn.handle("LOAD", &mut cache, &mut worker).unwrap();
    assert_eq!(
        out.replies,
        vec![
            "*filter".to_string(),
            ":INPUT ACCEPT [0:0]".to_string(),
            ":FORWARD ACCEPT [0:0]".to_string(),
            ":OUTPUT ACCEPT [0:0]".to_string(),
            "OK".to_string(),
        ]
    );

    let mut framer = Framer::new();
    let framed: Vec<String> = out.replies.iter().map(|r| framer.frame(r)).collect();
    assert_eq!(
        framed,
        vec!["000 *filter", "001 :INPUT ACCEPT [0:0]", "002 :FORWARD ACCEPT [0:0]", "003 :OUTPUT ACCEPT [0:0]", "004 OK"]
    );
}

/// Scenario 2: append a rule through SAVE/TABLE/COMMIT; the cache picks
/// up the new rule in lock-step with the (stubbed) restore utility.
#[test]
fn append_rule_updates_cache_after_commit() {
    let mut cache = Cache::new();
    let mut worker = Worker::new(
        AddressFamily::V4,
        sh("printf '*filter\\n:INPUT ACCEPT [0:0]\\nCOMMIT\\n'"),
        sh("cat >/dev/null"),
        logger(),
    );
    let mut conn = Connection::new(AddressFamily::V4, 1, 1);

    conn.handle("LOAD", &mut cache, &mut worker).unwrap();
    assert!(conn_is_sync(&mut conn, &mut cache, &mut worker));

    conn.handle("SAVE", &mut cache, &mut worker).unwrap();
    conn.handle("TABLE/filter", &mut cache, &mut worker).unwrap();
    conn.handle("-A INPUT -s 10.0.0.1 -j DROP", &mut cache, &mut worker)
        .unwrap();
    let out = conn.handle("COMMIT", &mut cache, &mut worker).unwrap();

    assert_eq!(out.replies, vec!["OK".to_string()]);
    assert!(out.fanout);
    let rules = &cache.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").unwrap().rules;
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].serialize_line(), "--src 10.0.0.1 -j DROP");
}

/// Scenario 3: a successful COMMIT from one client forces every other
/// client on the same family back to `void`.
#[test]
fn peer_is_invalidated_after_a_sibling_commit() {
    let mut cache = Cache::new();
    let mut worker = Worker::new(
        AddressFamily::V4,
        sh("printf '*filter\\n:INPUT ACCEPT [0:0]\\nCOMMIT\\n'"),
        sh("cat >/dev/null"),
        logger(),
    );
    let mut a = Connection::new(AddressFamily::V4, 1, 1);
    let mut b = Connection::new(AddressFamily::V4, 2, 1);

    a.handle("LOAD", &mut cache, &mut worker).unwrap();
    b.handle("SYNC", &mut cache, &mut worker).unwrap();

    a.handle("SAVE", &mut cache, &mut worker).unwrap();
    a.handle("TABLE/filter", &mut cache, &mut worker).unwrap();
    a.handle("-A INPUT -s 10.0.0.1 -j DROP", &mut cache, &mut worker)
        .unwrap();
    let out = a.handle("COMMIT", &mut cache, &mut worker).unwrap();
    assert!(out.fanout);

    // The daemon's event loop is what actually drives invalidation on
    // `fanout`; here we apply the same effect directly, as `daemon.rs`
    // does for every connection other than the originator.
    b.invalidate();

    let rejected = b.handle("SAVE", &mut cache, &mut worker).unwrap();
    assert_eq!(rejected.replies, vec!["FAILURE/current state is out-of-date".to_string()]);
}

/// Scenario 4: BOOT discards whatever restore-utility child the worker
/// was holding and reloads fresh, returning to `void`.
#[test]
fn boot_restarts_worker_and_reloads() {
    let mut cache = Cache::new();
    let mut worker = Worker::new(
        AddressFamily::V4,
        sh("printf '*filter\\n:INPUT ACCEPT [0:0]\\nCOMMIT\\n'"),
        sh("cat >/dev/null"),
        logger(),
    );
    // Make the worker hold a live restore child before BOOT tears it down.
    worker.commit(&["*filter".to_string(), "COMMIT".to_string()]).unwrap();

    let mut conn = Connection::new(AddressFamily::V4, 1, 1);
    let out = conn.handle("BOOT", &mut cache, &mut worker).unwrap();
    assert_eq!(out.replies, vec!["OK".to_string()]);
    assert!(cache.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").is_some());

    let rejected = conn.handle("SAVE", &mut cache, &mut worker).unwrap();
    assert_eq!(rejected.replies, vec!["FAILURE/current state is out-of-date".to_string()]);
}

/// Scenario 5: a rejected commit surfaces the restore utility's failure
/// as `FAILURE/<msg>` and leaves the cache untouched.
#[test]
fn rejected_commit_reports_failure_and_does_not_touch_cache() {
    let mut cache = Cache::new();
    let mut worker = Worker::new(
        AddressFamily::V4,
        sh("printf '*filter\\n:INPUT ACCEPT [0:0]\\nCOMMIT\\n'"),
        sh("exit 1"),
        logger(),
    );
    let mut conn = Connection::new(AddressFamily::V4, 1, 1);

    conn.handle("LOAD", &mut cache, &mut worker).unwrap();
    conn.handle("SAVE", &mut cache, &mut worker).unwrap();
    conn.handle("TABLE/filter", &mut cache, &mut worker).unwrap();
    conn.handle("-A INPUT -s 10.0.0.1 -j DROP", &mut cache, &mut worker)
        .unwrap();
    let out = conn.handle("COMMIT", &mut cache, &mut worker).unwrap();

    assert!(!out.fanout);
    assert_eq!(out.replies.len(), 1);
    assert!(out.replies[0].starts_with("FAILURE/"));
    assert!(cache.table(AddressFamily::V4, "filter").unwrap().chain("INPUT").unwrap().rules.is_empty());

    // A failed COMMIT returns to `sync`, not `void`: the client can
    // SAVE again immediately without an intervening re-LOAD.
    let retry = conn.handle("SAVE", &mut cache, &mut worker).unwrap();
    assert!(retry.replies.is_empty());
}

/// Scenario 6: negation round-trips end to end through LOAD.
#[test]
fn negation_round_trips_through_load() {
    let mut cache = Cache::new();
    let mut worker = Worker::new(
        AddressFamily::V4,
        sh("printf '*filter\\n:OUTPUT ACCEPT [0:0]\\n-A OUTPUT ! -p tcp -m tcp ! --dport 22 -j ACCEPT\\nCOMMIT\\n'"),
        sh("cat >/dev/null"),
        logger(),
    );
    let mut conn = Connection::new(AddressFamily::V4, 1, 1);
    conn.handle("LOAD", &mut cache, &mut worker).unwrap();

    let rule = &cache.table(AddressFamily::V4, "filter").unwrap().chain("OUTPUT").unwrap().rules[0];
    assert_eq!(rule.attr(pytables::model::AttrKind::Protocol), Some("! tcp"));
    assert_eq!(rule.matches[0].get("dport"), Some("! 22"));
}

fn conn_is_sync(conn: &mut Connection, cache: &mut Cache, worker: &mut Worker) -> bool {
    // SYNC is a no-op reply in every state except `void`/`save`/`boot`
    // where it isn't accepted at all; using it here as an observable
    // probe keeps the state machine's internals private to connection.rs.
    conn.handle("SYNC", cache, worker).map(|o| o.replies == vec!["OK".to_string()]).unwrap_or(false)
}
