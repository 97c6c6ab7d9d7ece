//! E2E Test Suite 05: Concurrency
//!
//! Many threads hammering one store: concurrent adds of the same value
//! deduplicate to a single handle, the final count equals the number of
//! distinct values, and handles issued on any thread resolve on every
//! other, growth included.

extern crate handex;

use std::sync::Arc;

use handex::{ShortStore, WideStore};

/// Deterministic xorshift so every thread shuffles its work differently
/// without pulling in an RNG crate.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn shuffled(len: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = XorShift(seed | 1);
    for i in (1..len).rev() {
        let j = (rng.next() % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: eight threads, one value
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_concurrent_adds_of_one_value_share_a_handle() {
    let store: Arc<WideStore<String>> = Arc::new(WideStore::new(8));
    let value = "the one value".to_string();

    let mut per_thread = Vec::new();
    std::thread::scope(|s| {
        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let value = value.clone();
            joins.push(s.spawn(move || {
                let mut handles = Vec::with_capacity(1_000);
                for _ in 0..1_000 {
                    handles.push(store.add(&value).unwrap());
                }
                handles
            }));
        }
        for j in joins {
            per_thread.push(j.join().unwrap());
        }
    });

    let first = per_thread[0][0];
    for handles in &per_thread {
        for h in handles {
            assert_eq!(*h, first);
        }
    }
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(first).unwrap(), Some(value));
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: eight threads, one shared sequence in eight different orders
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_shuffled_inserts_agree_on_every_handle() {
    const DISTINCT: usize = 10_000;
    let store: Arc<WideStore<String>> = Arc::new(WideStore::new(8));
    let values: Arc<Vec<String>> =
        Arc::new((0..DISTINCT).map(|n| format!("shared-{n}")).collect());

    let mut per_thread = Vec::new();
    std::thread::scope(|s| {
        let mut joins = Vec::new();
        for t in 0..8u64 {
            let store = Arc::clone(&store);
            let values = Arc::clone(&values);
            joins.push(s.spawn(move || {
                let mut handles = vec![None; DISTINCT];
                for i in shuffled(DISTINCT, 0x9E37_79B9 ^ t) {
                    handles[i] = Some(store.add(&values[i]).unwrap());
                }
                handles
            }));
        }
        for j in joins {
            per_thread.push(j.join().unwrap());
        }
    });

    assert_eq!(store.len(), DISTINCT);
    for i in 0..DISTINCT {
        let expected = per_thread[0][i].unwrap();
        for handles in &per_thread {
            assert_eq!(handles[i].unwrap(), expected, "threads disagree on {i}");
        }
        assert_eq!(store.get(expected).unwrap().as_ref(), Some(&values[i]));
        assert_eq!(store.find(&values[i]).unwrap(), expected);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: concurrent inserts racing constant vertical growth
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_growth_under_contention_preserves_every_handle() {
    // Single-slot rows at width 9: splits happen continuously while eight
    // threads insert disjoint value ranges.
    let store: Arc<ShortStore<String>> = Arc::new(ShortStore::new(9));

    let mut per_thread = Vec::new();
    std::thread::scope(|s| {
        let mut joins = Vec::new();
        for t in 0..8usize {
            let store = Arc::clone(&store);
            joins.push(s.spawn(move || {
                let mut issued = Vec::with_capacity(1_000);
                for n in 0..1_000 {
                    let v = format!("range-{t}-{n}");
                    issued.push((store.add(&v).unwrap(), v));
                }
                issued
            }));
        }
        for j in joins {
            per_thread.push(j.join().unwrap());
        }
    });

    assert_eq!(store.len(), 8_000);
    assert!(store.bit_width() > 9);
    for issued in &per_thread {
        for (h, v) in issued {
            assert_eq!(store.get(*h).unwrap().as_ref(), Some(v));
            assert_eq!(store.find(v).unwrap(), *h);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: readers run against writers without tearing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_reads_interleaved_with_writes_see_only_whole_values() {
    let store: Arc<WideStore<String>> = Arc::new(WideStore::new(8));
    let seed: Vec<String> = (0..500).map(|n| format!("seed-{n}")).collect();
    let mut seeded = Vec::new();
    for v in &seed {
        seeded.push(store.add(v).unwrap());
    }

    std::thread::scope(|s| {
        // Writers keep adding fresh values.
        for t in 0..4usize {
            let store = Arc::clone(&store);
            s.spawn(move || {
                for n in 0..2_000 {
                    store.add(&format!("writer-{t}-{n}")).unwrap();
                }
            });
        }
        // Readers hammer the seeded handles; a resolved value must always
        // be exactly the one its handle was issued for.
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let seed = seed.clone();
            let seeded = seeded.clone();
            s.spawn(move || {
                for round in 0..200 {
                    let i = (round * 37) % seeded.len();
                    let got = store.get(seeded[i]).unwrap();
                    assert_eq!(got.as_ref(), Some(&seed[i]));
                }
            });
        }
    });

    assert_eq!(store.len(), 500 + 4 * 2_000);
}
