use super::*;
use crate::keyspace::Keyspace;
use crate::kv::mem::MemEngine;

fn new_storage(name: &str) -> (Arc<MemEngine>, Keyspace, Storage) {
    let engine = Arc::new(MemEngine::new());
    let keyspace = Keyspace::open(engine.clone()).unwrap();
    let storage = Storage::open(engine.clone(), &keyspace, name).unwrap();
    (engine, keyspace, storage)
}

#[test]
fn test_s1_basic_put_get() {
    let (engine, _ks, storage) = new_storage("s");
    let mut batch = Batch::new();
    let id1 = storage.put(&mut batch, b"hello").unwrap();
    let id2 = storage.put(&mut batch, b"world").unwrap();
    batch.commit(engine.as_ref()).unwrap();

    assert_eq!(id1, 1);
    assert_eq!(id2, 2);
    assert_eq!(storage.get(1).unwrap(), Some(b"hello".to_vec()));
    assert_eq!(storage.get(2).unwrap(), Some(b"world".to_vec()));
}

#[test]
fn test_s2_replacement_chain_and_compact() {
    let (engine, _ks, storage) = new_storage("s");

    let mut batch = Batch::new();
    let id1 = storage.put(&mut batch, b"a").unwrap();
    batch.commit(engine.as_ref()).unwrap();

    let mut batch = Batch::new();
    let id2 = storage.put_replacing(&mut batch, b"b", id1).unwrap();
    batch.commit(engine.as_ref()).unwrap();

    let mut batch = Batch::new();
    let id3 = storage.put_replacing(&mut batch, b"c", id2).unwrap();
    batch.commit(engine.as_ref()).unwrap();

    assert_eq!((id1, id2, id3), (1, 2, 3));

    // walk prev chain from id3: stored prev is read back via raw bytes.
    let raw3 = engine.get(&doc_key(storage.kid(), id3)).unwrap().unwrap();
    let (prev3, _doc3) = decode_value(&raw3).unwrap();
    assert_eq!(prev3, id2);
    let raw2 = engine.get(&doc_key(storage.kid(), id2)).unwrap().unwrap();
    let (prev2, _doc2) = decode_value(&raw2).unwrap();
    assert_eq!(prev2, id1);
    let raw1 = engine.get(&doc_key(storage.kid(), id1)).unwrap().unwrap();
    let (prev1, _doc1) = decode_value(&raw1).unwrap();
    assert_eq!(prev1, 0);

    let mut batch = Batch::new();
    storage.compact(&mut batch).unwrap();
    batch.commit(engine.as_ref()).unwrap();

    assert_eq!(storage.get(1).unwrap(), None);
    assert_eq!(storage.get(2).unwrap(), None);
    assert_eq!(storage.get(3).unwrap(), Some(b"c".to_vec()));
}

#[test]
fn test_erase_tombstones_and_hides_doc_from_get() {
    let (engine, _ks, storage) = new_storage("s");

    let mut batch = Batch::new();
    let id1 = storage.put(&mut batch, b"a").unwrap();
    batch.commit(engine.as_ref()).unwrap();

    let mut batch = Batch::new();
    let id2 = storage.erase(&mut batch, id1).unwrap();
    batch.commit(engine.as_ref()).unwrap();

    assert_eq!(storage.get(id2).unwrap(), Some(Vec::new()));
    // read_live treats a tombstoned predecessor as having nothing live to
    // surface: chaining another put off id2 sees no old_doc.
    let mut batch = Batch::new();
    let id3 = storage.put_replacing(&mut batch, b"z", id2).unwrap();
    batch.commit(engine.as_ref()).unwrap();
    assert_eq!(storage.get(id3).unwrap(), Some(b"z".to_vec()));
}

#[test]
fn test_purge_bypasses_observers() {
    let (engine, _ks, storage) = new_storage("s");
    let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let fired2 = fired.clone();
    let _ticket = storage.observers.register(move |_u: &Update, _b: &mut Batch| {
        fired2.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(true)
    });

    let mut batch = Batch::new();
    let id = storage.put(&mut batch, b"a").unwrap();
    batch.commit(engine.as_ref()).unwrap();
    assert!(fired.load(std::sync::atomic::Ordering::SeqCst));

    fired.store(false, std::sync::atomic::Ordering::SeqCst);
    let mut batch = Batch::new();
    storage.purge(&mut batch, id);
    batch.commit(engine.as_ref()).unwrap();

    assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(storage.get(id).unwrap(), None);
}

#[test]
fn test_rescan_for_replays_live_rows_only() {
    let (engine, _ks, storage) = new_storage("s");
    let mut batch = Batch::new();
    storage.put(&mut batch, b"a").unwrap();
    let id2 = storage.put(&mut batch, b"b").unwrap();
    batch.commit(engine.as_ref()).unwrap();

    let mut batch = Batch::new();
    storage.erase(&mut batch, id2).unwrap(); // allocates id3 as a tombstone
    batch.commit(engine.as_ref()).unwrap();

    let seen = std::sync::Mutex::new(Vec::new());
    storage
        .rescan_for(1, |update, _batch| {
            seen.lock().unwrap().push(update.new_id);
            Ok(())
        })
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

#[test]
fn test_export_import_round_trip() {
    let (engine, ks, storage) = new_storage("s");
    let mut batch = Batch::new();
    storage.put(&mut batch, b"a").unwrap();
    storage.put(&mut batch, b"b").unwrap();
    batch.commit(engine.as_ref()).unwrap();

    let dump = storage.export(&mut storage.scan()).unwrap();
    assert_eq!(dump.len(), 2);

    let engine2 = Arc::new(MemEngine::new());
    let ks2 = Keyspace::open(engine2.clone()).unwrap();
    let storage2 = Storage::open(engine2.clone(), &ks2, "s").unwrap();
    let mut batch = Batch::new();
    for (id, raw) in dump {
        storage2.import(&mut batch, id, raw);
    }
    batch.commit(engine2.as_ref()).unwrap();

    assert_eq!(storage2.get(1).unwrap(), Some(b"a".to_vec()));
    assert_eq!(storage2.get(2).unwrap(), Some(b"b".to_vec()));
    let _ = ks; // keep keyspace alive for the lifetime of `storage`
}
