mod common;

use common::{id, msg, open_file_store, token};
use stratadb::{ExpectedVersion, PageReadStatus, Position, StreamVersion};

// =============================================================================
// Stream Paging
// =============================================================================

#[tokio::test]
async fn forward_paging_with_look_ahead() {
    let (_dir, store, _clock) = open_file_store("read_paging.db").await;
    let t = token();

    store
        .append(
            "s1",
            ExpectedVersion::NoStream,
            vec![msg(1), msg(2), msg(3)],
            &t,
        )
        .await
        .unwrap();

    let first = store
        .read_stream_forwards("s1", 0, 2, true, &t)
        .await
        .unwrap();
    assert_eq!(
        first
            .messages
            .iter()
            .map(|m| m.stream_version)
            .collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert!(!first.is_end);
    assert_eq!(first.next_version, 2);

    let second = store.read_stream_next(&first, &t).await.unwrap();
    assert_eq!(
        second
            .messages
            .iter()
            .map(|m| m.stream_version)
            .collect::<Vec<_>>(),
        vec![2]
    );
    assert!(second.is_end);
    assert_eq!(second.next_version, 3);

    // The page after the end is empty until something new is appended.
    let third = store.read_stream_next(&second, &t).await.unwrap();
    assert!(third.messages.is_empty());
    assert!(third.is_end);

    store.close().await;
}

#[tokio::test]
async fn backward_read_from_end_returns_reverse_order() {
    let (_dir, store, _clock) = open_file_store("read_backward.db").await;
    let t = token();

    store
        .append(
            "s1",
            ExpectedVersion::NoStream,
            vec![msg(1), msg(2), msg(3)],
            &t,
        )
        .await
        .unwrap();

    let page = store
        .read_stream_backwards("s1", StreamVersion::END, 10, true, &t)
        .await
        .unwrap();
    assert_eq!(
        page.messages
            .iter()
            .map(|m| m.stream_version)
            .collect::<Vec<_>>(),
        vec![2, 1, 0]
    );
    assert!(page.is_end);
    assert_eq!(page.next_version, -1);

    // The terminal backward cursor yields an empty page, not a wrap-around.
    let after = store.read_stream_next(&page, &t).await.unwrap();
    assert!(after.messages.is_empty());
    assert!(after.is_end);

    store.close().await;
}

#[tokio::test]
async fn forward_and_backward_full_reads_mirror_each_other() {
    let (_dir, store, _clock) = open_file_store("read_mirror.db").await;
    let t = token();

    let batch: Vec<_> = (1..=25u128).map(msg).collect();
    store
        .append("s1", ExpectedVersion::NoStream, batch, &t)
        .await
        .unwrap();

    // Walk forward in small pages.
    let mut forward = Vec::new();
    let mut page = store
        .read_stream_forwards("s1", StreamVersion::START, 4, true, &t)
        .await
        .unwrap();
    loop {
        forward.extend(page.messages.iter().map(|m| m.stream_version));
        if page.is_end {
            break;
        }
        page = store.read_stream_next(&page, &t).await.unwrap();
    }

    // Walk backward in differently sized pages.
    let mut backward = Vec::new();
    let mut page = store
        .read_stream_backwards("s1", StreamVersion::END, 7, true, &t)
        .await
        .unwrap();
    loop {
        backward.extend(page.messages.iter().map(|m| m.stream_version));
        if page.is_end {
            break;
        }
        page = store.read_stream_next(&page, &t).await.unwrap();
    }

    backward.reverse();
    assert_eq!(forward, backward);
    assert_eq!(forward, (0..25).collect::<Vec<i64>>());

    store.close().await;
}

#[tokio::test]
async fn missing_stream_reads_as_not_found() {
    let (_dir, store, _clock) = open_file_store("read_missing.db").await;
    let t = token();

    let page = store
        .read_stream_forwards("ghost", 0, 10, true, &t)
        .await
        .unwrap();
    assert_eq!(page.status, PageReadStatus::StreamNotFound);
    assert_eq!(page.from_version, 0);
    assert_eq!(page.last_stream_version, -1);
    assert_eq!(page.last_stream_position, -1);
    assert!(page.is_end);
    assert!(page.messages.is_empty());

    // Same shape backwards.
    let page = store
        .read_stream_backwards("ghost", StreamVersion::END, 10, true, &t)
        .await
        .unwrap();
    assert_eq!(page.status, PageReadStatus::StreamNotFound);
    assert!(page.is_end);

    store.close().await;
}

#[tokio::test]
async fn reading_from_the_middle_of_a_stream() {
    let (_dir, store, _clock) = open_file_store("read_middle.db").await;
    let t = token();

    store
        .append(
            "s1",
            ExpectedVersion::NoStream,
            (1..=10u128).map(msg).collect(),
            &t,
        )
        .await
        .unwrap();

    let page = store
        .read_stream_forwards("s1", 6, 10, true, &t)
        .await
        .unwrap();
    assert_eq!(
        page.messages
            .iter()
            .map(|m| m.stream_version)
            .collect::<Vec<_>>(),
        vec![6, 7, 8, 9]
    );
    assert!(page.is_end);

    let page = store.read_stream_backwards("s1", 3, 10, true, &t).await.unwrap();
    assert_eq!(
        page.messages
            .iter()
            .map(|m| m.stream_version)
            .collect::<Vec<_>>(),
        vec![3, 2, 1, 0]
    );

    store.close().await;
}

// =============================================================================
// Lazy Payloads
// =============================================================================

#[tokio::test]
async fn lazy_pages_omit_payloads_until_fetched() {
    let (_dir, store, _clock) = open_file_store("read_lazy.db").await;
    let t = token();

    store
        .append(
            "s1",
            ExpectedVersion::NoStream,
            vec![msg(1).with_metadata(r#"{"who":"tester"}"#)],
            &t,
        )
        .await
        .unwrap();

    let page = store
        .read_stream_forwards("s1", 0, 10, false, &t)
        .await
        .unwrap();
    let message = &page.messages[0];
    assert!(message.payload.is_none());
    assert!(message.metadata.is_none());

    // The page carries everything needed to fetch lazily.
    let (payload, metadata) = store
        .read_message_data(&message.stream_id, message.message_id, &t)
        .await
        .unwrap()
        .expect("message exists");
    assert_eq!(payload, r#"{"n":1}"#);
    assert_eq!(metadata.as_deref(), Some(r#"{"who":"tester"}"#));

    assert!(store
        .read_message_data("s1", id(404), &t)
        .await
        .unwrap()
        .is_none());

    store.close().await;
}

// =============================================================================
// All-Log Paging
// =============================================================================

#[tokio::test]
async fn all_log_forward_paging_spans_streams() {
    let (_dir, store, _clock) = open_file_store("read_all.db").await;
    let t = token();

    store
        .append("a", ExpectedVersion::NoStream, vec![msg(1), msg(2)], &t)
        .await
        .unwrap();
    store
        .append("b", ExpectedVersion::NoStream, vec![msg(3)], &t)
        .await
        .unwrap();
    store
        .append("a", ExpectedVersion::Exact(1), vec![msg(4)], &t)
        .await
        .unwrap();

    let mut seen = Vec::new();
    let mut page = store
        .read_all_forwards(Position::START, 3, true, &t)
        .await
        .unwrap();
    loop {
        seen.extend(page.messages.iter().map(|m| (m.stream_id.clone(), m.message_id)));
        if page.is_end {
            break;
        }
        page = store.read_all_next(&page, &t).await.unwrap();
    }

    assert_eq!(
        seen,
        vec![
            ("a".to_string(), id(1)),
            ("a".to_string(), id(2)),
            ("b".to_string(), id(3)),
            ("a".to_string(), id(4)),
        ]
    );

    store.close().await;
}

#[tokio::test]
async fn all_log_backward_paging_reverses_commit_order() {
    let (_dir, store, _clock) = open_file_store("read_all_back.db").await;
    let t = token();

    for n in 1..=5u128 {
        store
            .append("s1", ExpectedVersion::Any, vec![msg(n)], &t)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut page = store
        .read_all_backwards(Position::END, 2, true, &t)
        .await
        .unwrap();
    loop {
        seen.extend(page.messages.iter().map(|m| m.message_id));
        if page.is_end {
            break;
        }
        page = store.read_all_next(&page, &t).await.unwrap();
    }

    assert_eq!(seen, vec![id(5), id(4), id(3), id(2), id(1)]);

    store.close().await;
}

#[tokio::test]
async fn is_end_means_the_next_page_is_empty() {
    let (_dir, store, _clock) = open_file_store("read_is_end.db").await;
    let t = token();

    store
        .append(
            "s1",
            ExpectedVersion::NoStream,
            vec![msg(1), msg(2), msg(3), msg(4)],
            &t,
        )
        .await
        .unwrap();

    // Exact-multiple page sizes are the tricky case for the look-ahead.
    let page = store
        .read_all_forwards(Position::START, 4, true, &t)
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 4);
    assert!(page.is_end);
    let next = store.read_all_next(&page, &t).await.unwrap();
    assert!(next.messages.is_empty());
    assert!(next.is_end);

    let page = store
        .read_all_forwards(Position::START, 2, true, &t)
        .await
        .unwrap();
    assert!(!page.is_end);
    let next = store.read_all_next(&page, &t).await.unwrap();
    assert!(!next.messages.is_empty());

    store.close().await;
}

#[tokio::test]
async fn a_read_after_an_append_observes_it() {
    let (_dir, store, _clock) = open_file_store("read_after_write.db").await;
    let t = token();

    // Tail the log across interleaved appends: each committed append must be
    // visible to the page read that follows it.
    let mut cursor = store
        .read_all_forwards(Position::START, 10, true, &t)
        .await
        .unwrap();
    assert!(cursor.messages.is_empty());

    for n in 1..=3u128 {
        store
            .append("s1", ExpectedVersion::Any, vec![msg(n)], &t)
            .await
            .unwrap();
        cursor = store.read_all_next(&cursor, &t).await.unwrap();
        assert_eq!(cursor.messages.len(), 1);
        assert_eq!(cursor.messages[0].message_id, id(n));
    }

    store.close().await;
}
