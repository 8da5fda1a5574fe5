//! Reclamation under concurrency.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use common::{dns_query, udp_frame, CLIENT, SERVER};
use layerscope_core::prelude::*;
use layerscope_core::protocol::DnsDecoder;
use layerscope_core::reclaim::{ReclaimDomain, Ref};

struct Tracked {
    value: u64,
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_for(what: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !what() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

#[test]
fn test_bare_reference_keeps_object_alive() {
    let domain = ReclaimDomain::spawn(Duration::from_millis(1)).unwrap();
    let drops = Arc::new(AtomicUsize::new(0));
    let object = domain.alloc(Tracked {
        value: 7,
        drops: drops.clone(),
    });

    let (ready_tx, ready_rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let reader_domain = domain.clone();
    let reader_ref = object.clone();
    let reader_drops = drops.clone();
    let reader = thread::spawn(move || {
        let guard = reader_domain.enter_shared_region();
        let bare = Ref::bare(&reader_ref, &guard);
        drop(reader_ref);
        ready_tx.send(()).unwrap();
        go_rx.recv().unwrap();
        // The last counted reference is long gone, the object is not.
        assert_eq!(reader_drops.load(Ordering::SeqCst), 0);
        bare.value
    });

    ready_rx.recv().unwrap();
    drop(object);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(domain.pending(), 1);

    go_tx.send(()).unwrap();
    assert_eq!(reader.join().unwrap(), 7);
    assert!(wait_for(|| drops.load(Ordering::SeqCst) == 1));
    assert_eq!(domain.stats().destroyed, 1);
    domain.stop();
}

#[test]
fn test_concurrent_churn_frees_everything_once() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 2_000;

    let domain = ReclaimDomain::spawn(Duration::from_millis(1)).unwrap();
    let drops = Arc::new(AtomicUsize::new(0));
    let slots: Arc<Mutex<Vec<Ref<Tracked>>>> = Arc::new(Mutex::new(
        (0..8)
            .map(|i| {
                domain.alloc(Tracked {
                    value: i,
                    drops: drops.clone(),
                })
            })
            .collect(),
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let domain = domain.clone();
            let slots = slots.clone();
            let drops = drops.clone();
            thread::spawn(move || {
                let mut sum = 0u64;
                for round in 0..ROUNDS {
                    let region = domain.enter_shared_region();
                    let index = (t * 31 + round * 7) % 8;
                    let held = {
                        let mut slots = slots.lock().unwrap();
                        let held = slots[index].clone();
                        // Replacing the slot releases the old object while
                        // `held` may still be in use.
                        slots[index] = domain.alloc(Tracked {
                            value: round as u64,
                            drops: drops.clone(),
                        });
                        held
                    };
                    let bare = Ref::bare(&held, &region);
                    drop(held);
                    sum = sum.wrapping_add(bare.value);
                }
                sum
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    slots.lock().unwrap().clear();
    domain.stop();
    let stats = domain.stats();
    assert_eq!(stats.created, (8 + THREADS * ROUNDS) as u64);
    assert_eq!(stats.live(), 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(drops.load(Ordering::SeqCst) as u64, stats.created);
}

#[test]
fn test_rebinding_while_dissecting() {
    let engine = Arc::new(
        Engine::with_default_decoders(EngineConfig {
            reclaim_interval: Some(Duration::from_millis(1)),
            ..EngineConfig::default()
        })
        .unwrap(),
    );
    let message = dns_query(9, "churn.test");

    let workers: Vec<_> = (0..4u16)
        .map(|w| {
            let engine = engine.clone();
            let message = message.clone();
            thread::spawn(move || {
                let mut leaves = [0usize; 2];
                for i in 0..500u16 {
                    let src_port = 10_000 + w * 1_000 + i;
                    let frame = udp_frame((CLIENT, src_port), (SERVER, 7000), &message);
                    let outcome =
                        engine.dissect(LINKTYPE_ETHERNET, 0, Frame::complete(&frame), i64::from(i));
                    assert!(outcome.is_complete());
                    match outcome.tree().leaf().unwrap().protocol() {
                        "udp" => leaves[0] += 1,
                        "dns" => leaves[1] += 1,
                        other => panic!("unexpected leaf {other}"),
                    }
                }
                leaves
            })
        })
        .collect();

    for _ in 0..200 {
        engine
            .register(DnsDecoder, TransportKind::UdpPort, KeyRange::exact(7000))
            .unwrap();
        thread::yield_now();
        assert!(engine.unregister("dns", TransportKind::UdpPort, KeyRange::exact(7000)));
    }

    let mut total = 0;
    for worker in workers {
        let leaves = worker.join().unwrap();
        total += leaves[0] + leaves[1];
    }
    assert_eq!(total, 2_000);

    engine.shutdown();
    let stats = engine.stats();
    assert_eq!(stats.reclaim.pending, 0);
    assert_eq!(stats.flows, 0);
    // Decoder objects are created on first use: only the bindings that
    // resolved some traffic still hold one.
    let instantiated = engine
        .muxer()
        .bindings()
        .iter()
        .filter(|b| b.instantiated)
        .count();
    assert!(instantiated > 0);
    assert_eq!(stats.reclaim.live(), instantiated as u64);
}
