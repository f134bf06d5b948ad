#![allow(clippy::unwrap_used, clippy::expect_used)]

use bridge_protocol::core::serialization;
use bridge_protocol::protocol::dispatcher::Dispatcher;
use bridge_protocol::protocol::ledger::Ledger;
use bridge_protocol::protocol::mailbox::Taken;
use bridge_protocol::protocol::message::{MessageType, Request};
use bridge_protocol::utils::crypto::Encryption;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encrypt_decrypt_shared_engine() {
    let engine = Arc::new(Encryption::new(&[42u8; 32]).unwrap());
    engine.regenerate_nonce_indices().unwrap();

    let mut tasks = JoinSet::new();
    for worker in 0..8usize {
        let engine = engine.clone();
        tasks.spawn(async move {
            for i in 0..2_000usize {
                let plaintext = vec![((worker + i) & 0xFF) as u8; i % 700];
                let framed = engine.encrypt(&plaintext).unwrap();
                assert_eq!(engine.decrypt(&framed).unwrap(), plaintext);
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_rotation_happens_once() {
    let engine = Arc::new(Encryption::new(&[7u8; 32]).unwrap());
    let winners = Arc::new(AtomicUsize::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let engine = engine.clone();
        let winners = winners.clone();
        tasks.spawn(async move {
            if engine.regenerate_nonce_indices().is_some() {
                winners.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    assert!(engine.is_rotated());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fulfil_and_sweep_race_delivers_exactly_once() {
    let ledger = Arc::new(Ledger::new());
    let delivered = Arc::new(AtomicUsize::new(0));

    let mut waiters = JoinSet::new();
    let mut replies = Vec::new();
    for n in 0..500 {
        let request = Request::new(MessageType::Message, n.to_string());
        let mailbox = ledger.add(&request, Duration::from_millis(5)).unwrap();
        let reply = Request::with_id(request.id().clone(), MessageType::Message, "pong");
        replies.push(serialization::decode(&serialization::encode(&reply).unwrap()).unwrap());

        let delivered = delivered.clone();
        waiters.spawn(async move {
            match mailbox.take(Duration::from_secs(2)).await {
                Taken::Value(_) => {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
                Taken::TimedOut => panic!("every entry must be resolved"),
            }
        });
    }

    let sweeper = {
        let ledger = ledger.clone();
        tokio::spawn(async move {
            let mut swept = 0;
            while !ledger.is_empty() {
                swept += ledger.sweep_expired(Instant::now());
                tokio::task::yield_now().await;
            }
            swept
        })
    };

    let mut fulfilled = 0;
    for reply in replies {
        if ledger.fulfill(reply).is_ok() {
            fulfilled += 1;
        }
    }

    let swept = sweeper.await.unwrap();
    while let Some(res) = waiters.join_next().await {
        res.unwrap();
    }

    assert_eq!(fulfilled + swept, 500);
    assert_eq!(delivered.load(Ordering::SeqCst), 500);
    assert!(ledger.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatcher_never_exceeds_worker_limit() {
    let dispatcher = Dispatcher::new(3);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..30 {
        let running = running.clone();
        let peak = peak.clone();
        let done = done.clone();
        dispatcher
            .submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while done.load(Ordering::SeqCst) < 30 || dispatcher.available() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(dispatcher.available(), 3);
}
