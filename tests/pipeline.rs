//! End-to-end checks of the pipelined sieve against known counts and the
//! sequential reference.

use sieve_pipeline::prelude::*;
use sieve_pipeline::BoundViolation;
use std::thread;

/// (bound, primes up to and including it)
const KNOWN_COUNTS: &[(i64, u64)] = &[
    (0, 0),
    (1, 0),
    (2, 1),
    (3, 2),
    (10, 4),
    (100, 25),
    (1_000, 168),
    (10_000, 1_229),
    (100_000, 9_592),
];

fn odd_primes_up_to(limit: i64) -> u64 {
    SequentialSieve::new().count_primes(limit).unwrap().saturating_sub(1)
}

#[test]
fn known_counts() {
    for &(limit, expected) in KNOWN_COUNTS {
        assert_eq!(count_primes(limit).unwrap(), expected, "limit {}", limit);
    }
}

#[test]
fn matches_sequential_sieve() {
    let pipelined = SieveActor::with_shard_capacity(7).unwrap();
    let sequential = SequentialSieve::new();

    for limit in 0..=400 {
        assert_eq!(
            pipelined.count_primes(limit).unwrap(),
            sequential.count_primes(limit).unwrap(),
            "limit {}",
            limit
        );
    }
}

#[test]
fn count_is_monotonic_in_the_bound() {
    let sieve = SieveActor::with_shard_capacity(16).unwrap();
    let mut previous = 0;

    for limit in 0..=300 {
        let count = sieve.count_primes(limit).unwrap();
        assert!(count >= previous, "count dropped at limit {}", limit);
        previous = count;
    }
}

#[test]
fn count_does_not_depend_on_shard_capacity() {
    let limit = 5_000;
    let expected = SequentialSieve::new().count_primes(limit).unwrap();

    for capacity in [1, 2, 10, 64, 1_000, 10_000] {
        let sieve = SieveActor::with_shard_capacity(capacity).unwrap();
        assert_eq!(sieve.count_primes(limit).unwrap(), expected, "capacity {}", capacity);
    }
}

#[test]
fn repeated_runs_agree() {
    let sieve = SieveActor::with_shard_capacity(25).unwrap();
    let first = sieve.run(20_000).unwrap();

    for _ in 0..5 {
        let again = sieve.run(20_000).unwrap();
        assert_eq!(again.count, first.count);
        assert_eq!(again.workers, first.workers);
    }
}

#[test]
fn concurrent_runs_do_not_interfere() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let sieve = SieveActor::with_shard_capacity(10 + i).unwrap();
                sieve.count_primes(10_000).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1_229);
    }
}

#[test]
fn chain_length_follows_capacity() {
    for (limit, capacity) in [(1_000, 10), (1_000, 167), (1_000, 168), (10_000, 100), (50, 1)] {
        let report = SieveActor::with_shard_capacity(capacity).unwrap().run(limit).unwrap();
        let odd_primes = odd_primes_up_to(limit);
        let expected = odd_primes.div_ceil(capacity as u64).max(1) as usize;

        assert_eq!(
            report.workers_created(),
            expected,
            "limit {} capacity {}",
            limit,
            capacity
        );
        assert_eq!(report.primes_in_shards(), odd_primes);
    }
}

#[test]
fn shards_fill_in_order() {
    let report = SieveActor::with_shard_capacity(50).unwrap().run(10_000).unwrap();
    let (tail, full) = report.workers.split_last().unwrap();

    for worker in full {
        assert_eq!(worker.primes_held, 50, "worker {}", worker.position);
    }
    assert!(tail.primes_held >= 1 && tail.primes_held <= 50);

    let largest: Vec<u64> = report.workers.iter().filter_map(|w| w.largest_prime).collect();
    assert!(largest.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn empty_run_keeps_a_single_worker() {
    let report = SieveActor::default().run(1).unwrap();

    assert_eq!(report.count, 0);
    assert_eq!(report.candidates_sent, 0);
    assert_eq!(report.workers_created(), 1);
    // only the end-of-stream signal
    assert_eq!(report.workers[0].messages_received, 1);
}

#[test]
fn collected_primes_match_count() {
    let sieve = SieveActor::with_shard_capacity(12).unwrap();
    let primes = sieve.collect_primes(2_000).unwrap();

    assert_eq!(primes.len() as u64, sieve.count_primes(2_000).unwrap());
    assert_eq!(primes.first(), Some(&2));
    assert_eq!(primes.last(), Some(&1_999));
    assert!(primes.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn negative_bound_is_rejected() {
    match count_primes(-1) {
        Err(Error::InvalidBound { limit, reason }) => {
            assert_eq!(limit, -1);
            assert_eq!(reason, BoundViolation::Negative);
        }
        other => panic!("expected an invalid bound, got {:?}", other),
    }

    assert!(SequentialSieve::new().count_primes(i64::MIN).is_err());
}

#[test]
fn overflowing_bound_is_rejected() {
    let err = count_primes(i64::MAX).unwrap_err();
    assert!(err.is_rejected_input());
    assert!(matches!(
        err,
        Error::InvalidBound {
            reason: BoundViolation::Overflow,
            ..
        }
    ));
}

#[test]
fn invalid_configuration_is_rejected() {
    assert!(SieveActor::new(SieveConfig::new().with_shard_capacity(0)).is_err());
    assert!(SieveActor::new(SieveConfig::new().with_thread_prefix("")).is_err());
    assert!(SieveActor::new(SieveConfig::new().with_threads(0)).is_err());
}

#[test]
fn custom_thread_settings_still_count() {
    let config = SieveConfig::new()
        .with_shard_capacity(20)
        .with_threads(3)
        .with_thread_prefix("filter")
        .with_stack_size(256 * 1024)
        .with_pinned_threads(true)
        .with_batch_size(1);
    let sieve = SieveActor::new(config).unwrap();

    assert_eq!(sieve.config().pool.thread_prefix, "filter");
    let report = sieve.run(3_000).unwrap();
    assert_eq!(report.count, 430);
    assert_eq!(report.pool_threads, 3);
}

#[test]
fn thousands_of_workers_share_a_small_pool() {
    // Capacity 1 gives one worker per odd prime: 2_261 workers on 2 threads.
    let config = SieveConfig::new().with_shard_capacity(1).with_threads(2);
    let report = SieveActor::new(config).unwrap().run(20_000).unwrap();

    assert_eq!(report.count, 2_262);
    assert_eq!(report.workers_created(), 2_261);
    assert_eq!(report.pool_threads, 2);
    assert!(report.workers.iter().all(|w| w.primes_held == 1));
}

#[test]
fn single_thread_pool_counts() {
    let config = SieveConfig::new().with_shard_capacity(3).with_threads(1);
    let sieve = SieveActor::new(config).unwrap();

    assert_eq!(sieve.count_primes(10_000).unwrap(), 1_229);
}
