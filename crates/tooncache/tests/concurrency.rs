// ==============================================
// CACHE CONCURRENCY TESTS (integration)
// ==============================================
//
// Many threads share one cache through `Arc`. Handles cross threads and the
// finalizer of every entry must run exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use tooncache::{Cache, CacheConfig, EvictionPolicy, Finalizer, LfuCache, LruCache};

fn counting(counter: &Arc<AtomicUsize>) -> Option<Finalizer<u64>> {
    let counter = counter.clone();
    Some(Box::new(move |_key: &[u8], _value: u64| {
        counter.fetch_add(1, Ordering::SeqCst);
    }))
}

fn key(thread: usize, i: usize) -> Vec<u8> {
    format!("t{thread}:k{}", i % 32).into_bytes()
}

// ==============================================
// Mixed insert / lookup / release storm
// ==============================================

fn hammer(cache: Arc<dyn Cache<u64>>) {
    const THREADS: usize = 8;
    const OPS: usize = 2_000;

    let inserted = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let inserted = inserted.clone();
            let finalized = finalized.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..OPS {
                    // Half the keys are shared between threads
                    let k = if i % 2 == 0 { key(t, i) } else { key(0, i) };
                    let h = cache.hash_key(&k);
                    match cache.lookup(&k, h) {
                        Some(handle) => {
                            assert_eq!(handle.key(), &k[..]);
                            cache.release(handle);
                        }
                        None => {
                            let handle = cache
                                .insert(&k, h, i as u64, 1 + i % 4, counting(&finalized))
                                .unwrap();
                            inserted.fetch_add(1, Ordering::SeqCst);
                            cache.release(handle);
                        }
                    }
                    if i % 97 == 0 {
                        cache.erase(&k, h);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert!(cache.total_charge() <= cache.capacity());
    cache.prune();
    assert!(cache.is_empty());
    assert_eq!(cache.total_charge(), 0);
    assert_eq!(
        finalized.load(Ordering::SeqCst),
        inserted.load(Ordering::SeqCst),
        "every inserted entry is finalized exactly once"
    );
}

#[test]
fn concurrent_lru_operations_finalize_every_entry() {
    hammer(Arc::new(LruCache::<u64>::new(64)));
}

#[test]
fn concurrent_lfu_operations_finalize_every_entry() {
    hammer(Arc::new(LfuCache::<u64>::new(64)));
}

// ==============================================
// Handles released on another thread
// ==============================================

#[test]
fn handle_released_on_another_thread() {
    let cache = Arc::new(LruCache::<u64>::new(16));
    let finalized = Arc::new(AtomicUsize::new(0));
    let h = cache.hash_key(b"shared");

    let handle = cache
        .insert(b"shared", h, 7, 1, counting(&finalized))
        .unwrap();
    cache.erase(b"shared", h);
    assert_eq!(finalized.load(Ordering::SeqCst), 0);

    let remote = cache.clone();
    thread::spawn(move || {
        assert_eq!(*handle.value(), 7);
        remote.release(handle);
    })
    .join()
    .unwrap();

    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}

#[test]
fn many_readers_pin_one_entry() {
    const READERS: usize = 6;

    let config = CacheConfig {
        capacity: 4,
        policy: EvictionPolicy::Lfu,
    };
    let cache: Arc<dyn Cache<u64>> = Arc::from(config.build::<u64>().unwrap());
    let finalized = Arc::new(AtomicUsize::new(0));
    let h = cache.hash_key(b"hot");
    let first = cache.insert(b"hot", h, 1, 1, counting(&finalized)).unwrap();

    let barrier = Arc::new(Barrier::new(READERS + 1));
    let handles = Arc::new(Mutex::new(Vec::new()));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let handles = handles.clone();
            thread::spawn(move || {
                let handle = cache.lookup(b"hot", h).unwrap();
                handles.lock().unwrap().push(handle);
                barrier.wait();
            })
        })
        .collect();

    barrier.wait();
    for reader in readers {
        reader.join().unwrap();
    }

    // Pinned by every reader: erase and fill the cache, it must survive
    cache.erase(b"hot", h);
    for i in 0..8u64 {
        let k = format!("cold{i}");
        let handle = cache
            .insert(k.as_bytes(), cache.hash_key(k.as_bytes()), i, 1, None)
            .unwrap();
        cache.release(handle);
    }
    assert_eq!(finalized.load(Ordering::SeqCst), 0);

    cache.release(first);
    let held: Vec<_> = handles.lock().unwrap().drain(..).collect();
    assert_eq!(held.len(), READERS);
    for handle in held {
        assert_eq!(*handle.value(), 1);
        cache.release(handle);
    }
    assert_eq!(finalized.load(Ordering::SeqCst), 1);
}
