//! Claim protocol across independent connections

use crate::common::{now, open, plain_http, submit, temp_db};
use chrono::Duration;
use frontier_scheduler::frontier::{BackoffPolicy, Outcome};
use frontier_scheduler::storage::{FrontierStore, HostStore};
use frontier_scheduler::{normalize_url, url_hash, FrontierStatus, Origin};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_claims_never_share_an_entry() {
    let (_dir, path) = temp_db();
    let now = now();

    let mut storage = open(&path);
    for i in 0..60 {
        submit(
            &mut storage,
            &format!("http://host{}.example.com/page", i),
            Origin::Manual,
            now,
        );
    }

    // Open every connection up front so schema setup does not race
    let connections: Vec<_> = (0..6).map(|_| open(&path)).collect();

    let handles: Vec<_> = connections
        .into_iter()
        .enumerate()
        .map(|(i, mut conn)| {
            thread::spawn(move || {
                let worker = format!("worker-{}", i);
                let mut claimed = Vec::new();
                while let Some(entry) = conn.claim(&worker, Duration::minutes(5), now).unwrap() {
                    assert_eq!(entry.entry.claimed_by.as_deref(), Some(worker.as_str()));
                    claimed.push(entry.entry.id);
                }
                claimed
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.join().unwrap() {
            total += 1;
            assert!(seen.insert(id), "entry {} claimed twice", id);
        }
    }
    assert_eq!(total, 60);

    let stats = storage.frontier_stats(now).unwrap();
    assert_eq!(stats.fetching, 60);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_single_entry_goes_to_exactly_one_claimant() {
    let (_dir, path) = temp_db();
    let now = now();

    let mut storage = open(&path);
    let id = submit(&mut storage, "http://example.com/only", Origin::Manual, now);

    let connections: Vec<_> = (0..8).map(|_| open(&path)).collect();
    let barrier = Arc::new(Barrier::new(connections.len()));

    let handles: Vec<_> = connections
        .into_iter()
        .enumerate()
        .map(|(i, mut conn)| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                conn.claim(&format!("worker-{}", i), Duration::minutes(5), now)
                    .unwrap()
                    .map(|claimed| claimed.entry.id)
            })
        })
        .collect();

    let winners: Vec<i64> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap())
        .collect();
    assert_eq!(winners, vec![id]);
}

#[test]
fn test_host_delay_holds_across_connections() {
    let (_dir, path) = temp_db();
    let now = now();

    let mut a = open(&path);
    let mut b = open(&path);
    submit(&mut a, "http://example.com/1", Origin::Manual, now);
    submit(&mut a, "http://example.com/2", Origin::Manual, now);

    assert!(a.claim("a", Duration::minutes(5), now).unwrap().is_some());

    // Same host, other connection, inside the 1s floor
    assert!(b
        .claim("b", Duration::minutes(5), now + Duration::milliseconds(500))
        .unwrap()
        .is_none());
    assert!(b
        .claim("b", Duration::minutes(5), now + Duration::seconds(1))
        .unwrap()
        .is_some());

    let host = b.get_host_state("example.com").unwrap().unwrap();
    assert_eq!(host.last_fetch_at, Some(now + Duration::seconds(1)));
}

#[test]
fn test_spellings_share_one_key_and_claimed_duplicate_is_noop() {
    let (_dir, path) = temp_db();
    let now = now();
    let mut storage = open(&path);

    let first = normalize_url("https://EXAMPLE.com/a?b=2&a=1#frag", None, &plain_http()).unwrap();
    let second = normalize_url("https://example.com/a?a=1&b=2", None, &plain_http()).unwrap();
    assert_eq!(url_hash(&first), url_hash(&second));

    let id = submit(&mut storage, "https://EXAMPLE.com/a?b=2&a=1#frag", Origin::Manual, now);
    let claimed = storage
        .claim("w1", Duration::minutes(5), now)
        .unwrap()
        .unwrap();
    assert_eq!(claimed.entry.id, id);

    // Resubmitting a claimed entry changes nothing, even with a better origin
    let again = submit(&mut storage, "https://example.com/a?a=1&b=2", Origin::Feed, now);
    assert_eq!(again, id);

    let entry = storage.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Fetching);
    assert_eq!(entry.origin, Origin::Manual);
    assert_eq!(entry.claimed_by.as_deref(), Some("w1"));
    assert_eq!(storage.frontier_stats(now).unwrap().total(), 1);
}

#[test]
fn test_reaped_lease_is_lost_to_the_original_worker() {
    let (_dir, path) = temp_db();
    let now = now();

    let mut worker = open(&path);
    let mut reaper = open(&path);
    let id = submit(&mut worker, "http://example.com/slow", Origin::Manual, now);

    worker.claim("w1", Duration::minutes(5), now).unwrap().unwrap();

    let later = now + Duration::minutes(6);
    let backoff = BackoffPolicy::default();
    assert_eq!(reaper.reap_expired_leases(later, 5, &backoff).unwrap(), 1);

    let entry = reaper.get_entry(id).unwrap().unwrap();
    assert_eq!(entry.status, FrontierStatus::Pending);
    assert_eq!(entry.retry_count, 1);
    assert_eq!(entry.next_fetch_at, later + backoff.delay(0));
    assert_eq!(entry.claimed_by, None);

    let outcome = Outcome::Fetched {
        content_hash: Some("abc".to_string()),
        etag: None,
        last_modified: None,
    };
    assert!(worker.complete(id, "w1", outcome, later).is_err());
}
