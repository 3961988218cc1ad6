//! Transactional coordination: obligations, cancellation, and collapsing.

use std::sync::mpsc;
use std::time::Duration;

use core_cache::{CacheError, CoreCache};

#[test]
fn miss_grants_insert_obligation() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("fresh_key").execute().unwrap();
    assert!(tx.found().is_none());
    assert!(tx.must_insert());
    assert!(tx.must_insert_or_update());
    assert!(tx.state().must_insert_or_update());
    assert!(!tx.state().found());

    let mut writer = tx.insert(Duration::from_secs(60)).execute().unwrap();
    writer.append("value").unwrap();
    writer.finish().unwrap();

    let found = cache.lookup("fresh_key").execute().unwrap().unwrap();
    assert_eq!(found.to_stream().into_string().unwrap(), "value");
}

#[test]
fn hit_carries_no_obligation() {
    let cache = CoreCache::new();
    let mut writer = cache
        .insert("existing", Duration::from_secs(60))
        .execute()
        .unwrap();
    writer.append("v").unwrap();
    writer.finish().unwrap();

    let tx = cache.transaction_lookup("existing").execute().unwrap();
    let found = tx.found().unwrap();
    assert!(!tx.must_insert());
    assert!(!tx.must_insert_or_update());
    assert_eq!(found.to_stream().into_string().unwrap(), "v");

    // a transaction without an obligation has nothing to cancel
    assert!(matches!(tx.cancel().unwrap_err(), CacheError::InvalidState));
}

#[test]
fn transactional_hits_count() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("counted").execute().unwrap();
    let writer = tx.insert(Duration::from_secs(60)).execute().unwrap();
    writer.finish().unwrap();

    let tx = cache.transaction_lookup("counted").execute().unwrap();
    assert_eq!(tx.found().unwrap().hits(), 1);
    let found = cache.lookup("counted").execute().unwrap().unwrap();
    assert_eq!(found.hits(), 2);
}

#[test]
fn cancel_releases_the_obligation_once() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("cancelled").execute().unwrap();
    assert!(tx.must_insert());

    tx.cancel().unwrap();
    assert!(matches!(
        tx.cancel().unwrap_err(),
        CacheError::AlreadyResolved
    ));
    assert!(matches!(
        tx.insert(Duration::from_secs(60)).execute().unwrap_err(),
        CacheError::AlreadyResolved
    ));

    // nothing was cached, and the next transaction takes over
    let tx = cache.transaction_lookup("cancelled").execute().unwrap();
    assert!(tx.must_insert());
}

#[test]
fn insert_resolves_the_transaction() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("once").execute().unwrap();
    let writer = tx.insert(Duration::from_secs(60)).execute().unwrap();
    writer.finish().unwrap();

    assert!(matches!(
        tx.cancel().unwrap_err(),
        CacheError::AlreadyResolved
    ));
    assert!(matches!(
        tx.insert(Duration::from_secs(60)).execute().unwrap_err(),
        CacheError::AlreadyResolved
    ));
}

#[test]
fn drop_without_resolution_releases_the_obligation() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("abandoned").execute().unwrap();
    assert!(tx.must_insert());
    drop(tx);

    let tx = cache.transaction_lookup("abandoned").execute().unwrap();
    assert!(tx.must_insert());
}

#[test]
fn execute_and_stream_back_reads_during_insertion() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("streamed_back").execute().unwrap();
    let (mut writer, found) = tx
        .insert(Duration::from_secs(60))
        .execute_and_stream_back()
        .unwrap();
    assert!(found.state().found());
    assert!(found.state().usable());
    // reading back the insertion is not a lookup hit
    assert_eq!(found.hits(), 0);

    let body = found.to_stream();
    let reader = std::thread::spawn(move || body.into_string().unwrap());
    writer.append("streamed").unwrap();
    writer.finish().unwrap();
    assert_eq!(reader.join().unwrap(), "streamed");

    let found = cache.lookup("streamed_back").execute().unwrap().unwrap();
    assert_eq!(found.hits(), 1);
}

#[test]
fn concurrent_misses_collapse_onto_one_writer() {
    let cache = CoreCache::new();
    let leader = cache.transaction_lookup("collapsed").execute().unwrap();
    assert!(leader.must_insert());

    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let follower_cache = cache.clone();
    let follower = std::thread::spawn(move || {
        started_tx.send(()).unwrap();
        let tx = follower_cache
            .transaction_lookup("collapsed")
            .execute()
            .unwrap();
        done_tx.send(()).unwrap();
        tx.found().unwrap().to_stream().into_string().unwrap()
    });

    started_rx.recv().unwrap();
    // the follower stays blocked while the leader holds the obligation
    assert!(done_rx
        .recv_timeout(Duration::from_millis(200))
        .is_err());

    let mut writer = leader.insert(Duration::from_secs(60)).execute().unwrap();
    writer.append("from the leader").unwrap();
    writer.finish().unwrap();

    assert_eq!(follower.join().unwrap(), "from the leader");
}

#[test]
fn cancelling_hands_the_obligation_to_a_waiter() {
    let cache = CoreCache::new();
    let leader = cache.transaction_lookup("handoff").execute().unwrap();
    assert!(leader.must_insert());

    let follower_cache = cache.clone();
    let follower = std::thread::spawn(move || {
        let tx = follower_cache
            .transaction_lookup("handoff")
            .execute()
            .unwrap();
        tx.must_insert()
    });

    // give the follower time to block on the leader's obligation
    std::thread::sleep(Duration::from_millis(100));
    leader.cancel().unwrap();
    assert!(follower.join().unwrap());
}

#[test]
fn stale_hit_grants_revalidation_obligation() {
    let cache = CoreCache::new();
    let mut writer = cache
        .insert("revalidated", Duration::from_secs(1))
        .initial_age(Duration::from_secs(10))
        .stale_while_revalidate(Duration::from_secs(3600))
        .user_metadata(&b"old meta"[..])
        .execute()
        .unwrap();
    writer.append("stale body").unwrap();
    writer.finish().unwrap();

    let tx = cache.transaction_lookup("revalidated").execute().unwrap();
    let found = tx.found().unwrap();
    assert!(found.is_stale());
    assert!(tx.must_insert_or_update());
    assert!(!tx.must_insert());

    tx.update(Duration::from_secs(3600))
        .user_metadata(&b"new meta"[..])
        .execute()
        .unwrap();

    // the body is untouched, the metadata is replaced, and the entry is fresh
    let found = cache.lookup("revalidated").execute().unwrap().unwrap();
    assert!(!found.is_stale());
    assert_eq!(found.max_age(), Duration::from_secs(3600));
    assert_eq!(found.user_metadata().as_ref(), b"new meta");
    assert_eq!(found.to_stream().into_string().unwrap(), "stale body");
}

#[test]
fn only_one_transaction_revalidates_a_stale_entry() {
    let cache = CoreCache::new();
    let mut writer = cache
        .insert("contested", Duration::from_secs(1))
        .initial_age(Duration::from_secs(10))
        .stale_while_revalidate(Duration::from_secs(3600))
        .execute()
        .unwrap();
    writer.append("stale").unwrap();
    writer.finish().unwrap();

    let first = cache.transaction_lookup("contested").execute().unwrap();
    assert!(first.must_insert_or_update());

    // a stale-but-usable entry keeps serving while the first transaction
    // holds the revalidation obligation
    let second = cache.transaction_lookup("contested").execute().unwrap();
    assert!(second.found().is_some());
    assert!(!second.must_insert_or_update());
}

#[test]
fn update_without_a_found_entry_fails() {
    let cache = CoreCache::new();
    let tx = cache.transaction_lookup("nothing_here").execute().unwrap();
    assert!(tx.must_insert());
    assert!(matches!(
        tx.update(Duration::from_secs(60)).execute().unwrap_err(),
        CacheError::InvalidState
    ));
    // the failed update did not consume the obligation
    tx.cancel().unwrap();
}

#[test]
fn transactions_respect_vary_rules() {
    let cache = CoreCache::new();
    let tx = cache
        .transaction_lookup("varied_tx")
        .header("animal", "cat")
        .execute()
        .unwrap();
    assert!(tx.must_insert());
    let mut writer = tx
        .insert(Duration::from_secs(60))
        .vary_by(["animal"])
        .execute()
        .unwrap();
    writer.append("meow").unwrap();
    writer.finish().unwrap();

    // a different value for the varied header is an independent miss
    let tx = cache
        .transaction_lookup("varied_tx")
        .header("animal", "dog")
        .execute()
        .unwrap();
    assert!(tx.must_insert());
    drop(tx);

    let tx = cache
        .transaction_lookup("varied_tx")
        .header("animal", "cat")
        .execute()
        .unwrap();
    assert_eq!(
        tx.found().unwrap().to_stream().into_string().unwrap(),
        "meow"
    );
}
