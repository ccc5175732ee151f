use super::*;
use crate::keyspace::Keyspace;
use crate::kv::mem::MemEngine;

/// Docs encoded as `key\0value_be_i32` for these tests.
fn doc(key: &str, value: i32) -> Vec<u8> {
    let mut v = key.as_bytes().to_vec();
    v.push(0);
    v.extend_from_slice(&value.to_be_bytes());
    v
}

fn split(doc: &[u8]) -> (&str, i32) {
    let nul = doc.iter().position(|&b| b == 0).unwrap();
    let key = std::str::from_utf8(&doc[..nul]).unwrap();
    let value = i32::from_be_bytes(doc[nul + 1..].try_into().unwrap());
    (key, value)
}

fn sum_aggregator() -> (GroupFn, UpdateFn) {
    let group_fn: GroupFn = Arc::new(|d: &[u8]| split(d).0.as_bytes().to_vec());
    let update_fn: UpdateFn = Arc::new(|current: Option<&[u8]>, d: &[u8], is_erase: bool| {
        let (_k, v) = split(d);
        let sum = current
            .map(|b| i32::from_be_bytes(b.try_into().unwrap()))
            .unwrap_or(0);
        let next = if is_erase { sum - v } else { sum + v };
        if next == 0 {
            None
        } else {
            Some(next.to_be_bytes().to_vec())
        }
    });
    (group_fn, update_fn)
}

#[test]
fn test_s6_incremental_sum() {
    let engine = Arc::new(MemEngine::new());
    let keyspace = Keyspace::open(engine.clone()).unwrap();
    let storage = Storage::open(engine.clone(), &keyspace, "kv").unwrap();
    let (group_fn, update_fn) = sum_aggregator();
    let (agg, _ticket) =
        IncrementalAggregator::attach(engine.clone(), &keyspace, "sums", group_fn, update_fn, 1, &storage).unwrap();

    let mut batch = Batch::new();
    storage.put(&mut batch, &doc("a", 1)).unwrap();
    batch.commit(engine.as_ref()).unwrap();
    let mut batch = Batch::new();
    let id_a2 = storage.put(&mut batch, &doc("a", 2)).unwrap();
    batch.commit(engine.as_ref()).unwrap();
    let mut batch = Batch::new();
    storage.put(&mut batch, &doc("b", 5)).unwrap();
    batch.commit(engine.as_ref()).unwrap();

    let read = |agg: &IncrementalAggregator, key: &str| -> i32 {
        agg.get(key.as_bytes())
            .unwrap()
            .map(|b| i32::from_be_bytes(b.try_into().unwrap()))
            .unwrap_or(0)
    };
    assert_eq!(read(&agg, "a"), 3);
    assert_eq!(read(&agg, "b"), 5);

    let mut batch = Batch::new();
    let id_a1 = 1; // doc ("a", 1) was id 1
    let _ = id_a2;
    storage.erase(&mut batch, id_a1).unwrap();
    batch.commit(engine.as_ref()).unwrap();

    assert_eq!(read(&agg, "a"), 2);
    assert_eq!(read(&agg, "b"), 5);
}

#[test]
fn test_group_cleared_when_sum_returns_to_zero() {
    let engine = Arc::new(MemEngine::new());
    let keyspace = Keyspace::open(engine.clone()).unwrap();
    let storage = Storage::open(engine.clone(), &keyspace, "kv").unwrap();
    let (group_fn, update_fn) = sum_aggregator();
    let (agg, _ticket) =
        IncrementalAggregator::attach(engine.clone(), &keyspace, "sums", group_fn, update_fn, 1, &storage).unwrap();

    let mut batch = Batch::new();
    let id = storage.put(&mut batch, &doc("a", 4)).unwrap();
    batch.commit(engine.as_ref()).unwrap();
    assert!(agg.get(b"a").unwrap().is_some());

    let mut batch = Batch::new();
    storage.erase(&mut batch, id).unwrap();
    batch.commit(engine.as_ref()).unwrap();
    assert_eq!(agg.get(b"a").unwrap(), None);
}
