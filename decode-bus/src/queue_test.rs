use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{BoundedQueue, PopError, PushError};

#[test]
fn test_try_push_respects_capacity() {
    let queue = BoundedQueue::new(2);
    assert!(queue.try_push(1).is_ok());
    assert!(queue.try_push(2).is_ok());
    assert!(queue.is_full());
    match queue.try_push(3) {
        Err(PushError::Full(3)) => {}
        other => panic!("expected Full(3), got {:?}", other),
    }
    assert_eq!(queue.try_pop(), Some(1));
    assert_eq!(queue.try_pop(), Some(2));
    assert_eq!(queue.try_pop(), None);
}

#[test]
fn test_zero_capacity_is_clamped() {
    let queue = BoundedQueue::<u8>::new(0);
    assert_eq!(queue.capacity(), 1);
    assert!(queue.try_push(1).is_ok());
}

#[test]
fn test_closed_queue_rejects_push() {
    let queue = BoundedQueue::new(4);
    queue.close();
    match queue.try_push("a") {
        Err(PushError::Closed("a")) => {}
        other => panic!("expected Closed, got {:?}", other),
    }
    queue.reopen();
    assert!(queue.try_push("b").is_ok());
}

#[test]
fn test_peek_and_pop_front_while() {
    let queue = BoundedQueue::new(8);
    for i in 0..6 {
        queue.try_push(i).unwrap();
    }
    assert_eq!(queue.peek_with(|v| *v * 10), Some(0));
    assert_eq!(queue.pop_front_while(|v| *v < 3), 3);
    assert_eq!(queue.peek_with(|v| *v), Some(3));
    assert_eq!(queue.len(), 3);
}

#[test]
fn test_retain_and_drain() {
    let queue = BoundedQueue::new(8);
    for i in 0..8 {
        queue.try_push(i).unwrap();
    }
    assert_eq!(queue.retain(|v| v % 2 == 0), 4);
    assert_eq!(queue.drain(), vec![0, 2, 4, 6]);
    assert!(queue.is_empty());
}

#[test]
fn test_retain_releases_removed_items_in_order() {
    let marker = Arc::new(());
    let queue = BoundedQueue::new(4);
    for i in 0..4 {
        queue.try_push((i, Arc::clone(&marker))).unwrap();
    }
    assert_eq!(Arc::strong_count(&marker), 5);

    assert_eq!(queue.retain(|(i, _)| *i >= 2), 2);
    assert_eq!(Arc::strong_count(&marker), 3);
    assert!(!queue.is_full());
    let kept: Vec<i32> = queue.drain().into_iter().map(|(i, _)| i).collect();
    assert_eq!(kept, vec![2, 3]);
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[tokio::test]
async fn test_pop_waits_for_push() -> anyhow::Result<()> {
    let queue = Arc::new(BoundedQueue::new(1));
    let cancel = CancellationToken::new();

    let consumer = {
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.pop(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!consumer.is_finished());
    queue.try_push(42).unwrap();

    assert_eq!(consumer.await?, Ok(42));
    Ok(())
}

#[tokio::test]
async fn test_push_suspends_until_space() -> anyhow::Result<()> {
    let queue = Arc::new(BoundedQueue::new(1));
    let cancel = CancellationToken::new();
    queue.try_push(1).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.push(2, &cancel).await.is_ok() })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!producer.is_finished());
    assert_eq!(queue.len(), 1);

    assert_eq!(queue.try_pop(), Some(1));
    assert!(producer.await?);
    assert_eq!(queue.try_pop(), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_push_returns_item() -> anyhow::Result<()> {
    let queue = Arc::new(BoundedQueue::new(1));
    let cancel = CancellationToken::new();
    queue.try_push(String::from("first")).unwrap();

    let producer = {
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.push(String::from("second"), &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    match producer.await? {
        Err(PushError::Cancelled(item)) => assert_eq!(item, "second"),
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert_eq!(queue.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_close_wakes_waiting_pop() -> anyhow::Result<()> {
    let queue = Arc::new(BoundedQueue::<u32>::new(4));
    let cancel = CancellationToken::new();

    let consumer = {
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        tokio::spawn(async move { queue.pop(&cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();
    assert_eq!(consumer.await?, Err(PopError::Closed));
    Ok(())
}

#[tokio::test]
async fn test_pop_drains_before_reporting_closed() {
    let queue = BoundedQueue::new(4);
    let cancel = CancellationToken::new();
    queue.try_push(7).unwrap();
    queue.close();
    assert_eq!(queue.pop(&cancel).await, Ok(7));
    assert_eq!(queue.pop(&cancel).await, Err(PopError::Closed));
}

#[tokio::test]
async fn test_pop_on_cancelled_token() {
    let queue = BoundedQueue::<u32>::new(4);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(queue.pop(&cancel).await, Err(PopError::Cancelled));
}
