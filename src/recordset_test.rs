use super::*;
use crate::kv::mem::MemEngine;
use crate::kv::Engine;

fn seeded() -> (MemEngine, std::sync::Arc<dyn Snapshot>) {
    let engine = MemEngine::new();
    let mut batch = crate::kv::WriteBatch::new();
    for k in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()] {
        batch.put(k.clone(), k);
    }
    engine.write(batch).unwrap();
    let snap = engine.snapshot();
    (engine, snap)
}

#[test]
fn test_forward_scan_yields_ascending_order() {
    let (_engine, snap) = seeded();
    let mut rs = Recordset::new(snap, b"a".to_vec(), b"z".to_vec());
    let mut seen = Vec::new();
    while let Some((k, _)) = rs.next() {
        seen.push(k);
    }
    assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn test_inverted_bounds_scan_backward() {
    let (_engine, snap) = seeded();
    let mut rs = Recordset::new(snap, b"z".to_vec(), b"a".to_vec());
    let mut seen = Vec::new();
    while let Some((k, _)) = rs.next() {
        seen.push(k);
    }
    assert_eq!(seen, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
}

#[test]
fn test_filter_excludes_rows() {
    let (_engine, snap) = seeded();
    let mut rs = Recordset::new(snap, b"a".to_vec(), b"z".to_vec());
    rs.add_filter(Box::new(|k, _v| k != b"b"));
    let mut seen = Vec::new();
    while let Some((k, _)) = rs.next() {
        seen.push(k);
    }
    assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

#[test]
fn test_previous_backtracks_from_next() {
    let (_engine, snap) = seeded();
    let mut rs = Recordset::new(snap, b"a".to_vec(), b"z".to_vec());
    assert_eq!(rs.next().unwrap().0, b"a".to_vec());
    assert_eq!(rs.next().unwrap().0, b"b".to_vec());
    assert_eq!(rs.previous().unwrap().0, b"a".to_vec());
    assert_eq!(rs.previous(), None);
}

#[test]
fn test_reset_restarts_scan() {
    let (_engine, snap) = seeded();
    let mut rs = Recordset::new(snap, b"a".to_vec(), b"z".to_vec());
    rs.next();
    rs.next();
    rs.reset();
    assert_eq!(rs.next().unwrap().0, b"a".to_vec());
}

#[test]
fn test_count_aprox_grows_with_more_data() {
    let (engine, snap) = seeded();
    let rs = Recordset::new(snap, b"a".to_vec(), b"z".to_vec());
    let before = rs.count_aprox(&engine, 4).unwrap();

    let mut batch = crate::kv::WriteBatch::new();
    batch.put(b"e".to_vec(), vec![0u8; 64]);
    engine.write(batch).unwrap();

    let snap2 = engine.snapshot();
    let rs2 = Recordset::new(snap2, b"a".to_vec(), b"z".to_vec());
    let after = rs2.count_aprox(&engine, 4).unwrap();
    assert!(after > before);
}
