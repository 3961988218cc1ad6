//! Streaming body behavior: ranges, concurrent readers, and aborts.

use std::io::Read;
use std::time::Duration;

use core_cache::{CacheError, CoreCache};

fn insert_hello(cache: &CoreCache) {
    let mut writer = cache
        .insert("hello_key", Duration::from_secs(60))
        .execute()
        .unwrap();
    writer.append("hello").unwrap();
    writer.finish().unwrap();
}

#[test]
fn whole_body_stream() {
    let cache = CoreCache::new();
    insert_hello(&cache);
    let found = cache.lookup("hello_key").execute().unwrap().unwrap();
    assert_eq!(found.to_stream().into_string().unwrap(), "hello");
    // the handle can produce multiple independent streams
    assert_eq!(found.to_stream().into_string().unwrap(), "hello");
}

#[test]
fn range_requests() {
    let cache = CoreCache::new();
    insert_hello(&cache);
    let found = cache.lookup("hello_key").execute().unwrap().unwrap();

    let range = |from, to| {
        found
            .to_stream_from_range(from, to)
            .into_string()
            .unwrap()
    };

    // inclusive end offset
    assert_eq!(range(Some(1), Some(1)), "e");
    assert_eq!(range(Some(0), Some(2)), "hel");
    assert_eq!(range(Some(1), None), "ello");
    assert_eq!(range(None, Some(3)), "hell");
    // a zero end bound means "no bound", not an empty range
    assert_eq!(range(Some(1), Some(0)), "hello");
    assert_eq!(range(None, None), "hello");
    // bounds past the end clamp rather than erroring
    assert_eq!(range(Some(1000), None), "");
    assert_eq!(range(Some(2), Some(9999)), "llo");
}

#[test]
fn reader_streams_while_writer_appends() {
    let cache = CoreCache::new();
    let mut writer = cache
        .insert("streamed", Duration::from_secs(60))
        .execute()
        .unwrap();
    writer.append("first ").unwrap();

    let found = cache.lookup("streamed").execute().unwrap().unwrap();
    let mut body = found.to_stream();

    let mut buf = [0u8; 6];
    body.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"first ");

    let reader = std::thread::spawn(move || {
        let mut rest = String::new();
        body.read_to_string(&mut rest).unwrap();
        rest
    });
    writer.append("second").unwrap();
    writer.finish().unwrap();
    assert_eq!(reader.join().unwrap(), "second");
}

#[test]
fn aborted_stream_errors_readers_and_evicts() {
    let cache = CoreCache::new();
    let mut writer = cache
        .insert("doomed", Duration::from_secs(60))
        .execute()
        .unwrap();
    writer.append("partial").unwrap();

    let found = cache.lookup("doomed").execute().unwrap().unwrap();
    drop(writer);

    let err = found.to_stream().into_bytes().unwrap_err();
    assert!(matches!(err, CacheError::StreamUnavailable));

    // the truncated entry no longer serves lookups
    assert!(cache.lookup("doomed").execute().unwrap().is_none());
}

#[test]
fn declared_length_must_match_the_bytes_written() {
    let cache = CoreCache::new();

    // finishing short of the declared length aborts the entry
    let mut writer = cache
        .insert("shortfall", Duration::from_secs(60))
        .known_length(10)
        .execute()
        .unwrap();
    writer.append("hi").unwrap();
    assert!(matches!(
        writer.finish().unwrap_err(),
        CacheError::LengthMismatch {
            declared: 10,
            actual: 2
        }
    ));
    assert!(cache.lookup("shortfall").execute().unwrap().is_none());

    // appending past the declared length fails immediately
    let mut writer = cache
        .insert("overrun", Duration::from_secs(60))
        .known_length(3)
        .execute()
        .unwrap();
    assert!(matches!(
        writer.append("too many bytes").unwrap_err(),
        CacheError::LengthMismatch { declared: 3, .. }
    ));
    assert!(cache.lookup("overrun").execute().unwrap().is_none());

    // an exact match finishes cleanly and reports a consistent length
    let mut writer = cache
        .insert("exact", Duration::from_secs(60))
        .known_length(5)
        .execute()
        .unwrap();
    writer.append("hel").unwrap();
    writer.append("lo").unwrap();
    writer.finish().unwrap();
    let found = cache.lookup("exact").execute().unwrap().unwrap();
    assert_eq!(found.known_length(), Some(5));
    assert_eq!(found.to_stream().into_string().unwrap(), "hello");
}

#[test]
fn finish_consumes_writer() {
    let cache = CoreCache::new();
    let writer = cache
        .insert("done", Duration::from_secs(60))
        .execute()
        .unwrap();
    writer.finish().unwrap();

    let mut writer = cache
        .insert("done", Duration::from_secs(60))
        .execute()
        .unwrap();
    writer.append("x").unwrap();
    writer.finish().unwrap();
    // finish consumes the writer, so double-finish and append-after-finish
    // are unrepresentable; a fresh writer on a finished pipe is the closest
    // observable case
    let found = cache.lookup("done").execute().unwrap().unwrap();
    assert_eq!(found.to_stream().into_string().unwrap(), "x");
}

#[test]
fn close_releases_the_handle() {
    let cache = CoreCache::new();
    insert_hello(&cache);
    let found = cache.lookup("hello_key").execute().unwrap().unwrap();
    let body = found.to_stream();
    found.close();
    // open streams outlive the handle that created them
    assert_eq!(body.into_string().unwrap(), "hello");
}
