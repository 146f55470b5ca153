//! Reports serialize for tooling that wants to inspect a run.

#![cfg(feature = "serialization")]

use sieve_pipeline::prelude::*;

#[test]
fn report_serializes_to_json() {
    let report = SieveActor::with_shard_capacity(4).unwrap().run(30).unwrap();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["count"], 10);
    assert_eq!(value["limit"], 30);
    assert_eq!(value["shard_capacity"], 4);
    assert!(value["pool_threads"].as_u64().unwrap() >= 1);
    // nine odd primes in shards of four
    assert_eq!(value["workers"].as_array().unwrap().len(), 3);
    assert_eq!(value["workers"][0]["largest_prime"], 11);
}

#[test]
fn messages_serialize() {
    let candidate = serde_json::to_string(&sieve_pipeline::SieveMessage::Candidate(11)).unwrap();
    let end = serde_json::to_string(&sieve_pipeline::SieveMessage::EndOfStream).unwrap();

    assert_eq!(candidate, r#"{"Candidate":11}"#);
    assert_eq!(end, r#""EndOfStream""#);
}
