use super::*;
use crate::kv::mem::MemEngine;

fn new_keyspace() -> Keyspace {
    Keyspace::open(Arc::new(MemEngine::new())).unwrap()
}

#[test]
fn test_open_allocates_and_persists() {
    let ks = new_keyspace();
    let kid = ks.open_collection("users", Purpose::Storage).unwrap();
    assert_eq!(ks.lookup("users").unwrap(), Some((kid, Purpose::Storage)));
}

#[test]
fn test_reopen_same_name_returns_same_kid() {
    let ks = new_keyspace();
    let a = ks.open_collection("users", Purpose::Storage).unwrap();
    let b = ks.open_collection("users", Purpose::Storage).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_purpose_mismatch_is_not_an_error() {
    let ks = new_keyspace();
    let kid = ks.open_collection("users", Purpose::Storage).unwrap();
    let kid2 = ks.open_collection("users", Purpose::Map).unwrap();
    assert_eq!(kid, kid2);
    // the persisted purpose wins, advisory metadata is not overwritten.
    assert_eq!(ks.lookup("users").unwrap(), Some((kid, Purpose::Storage)));
}

#[test]
fn test_delete_recycles_kid() {
    let ks = new_keyspace();
    let kid = ks.open_collection("users", Purpose::Storage).unwrap();
    ks.delete_collection("users").unwrap();
    assert_eq!(ks.lookup("users").unwrap(), None);
    let kid2 = ks.open_collection("orders", Purpose::Storage).unwrap();
    assert_eq!(kid, kid2, "smallest free kid should be recycled");
}

#[test]
fn test_delete_erases_application_and_private_rows() {
    let engine = Arc::new(MemEngine::new());
    let ks = Keyspace::open(engine.clone()).unwrap();
    let kid = ks.open_collection("users", Purpose::Storage).unwrap();

    engine
        .write({
            let mut b = WriteBatch::new();
            b.put(app_key(kid, &[1]), b"doc".to_vec());
            b.put(private_key(kid, b"rev"), b"1".to_vec());
            b
        })
        .unwrap();

    ks.delete_collection("users").unwrap();

    assert_eq!(engine.get(&app_key(kid, &[1])).unwrap(), None);
    assert_eq!(engine.get(&private_key(kid, b"rev")).unwrap(), None);
    assert_eq!(engine.get(&name_key("users")).unwrap(), None);
}

#[test]
fn test_exhausting_kid_space_is_fatal() {
    let ks = new_keyspace();
    for i in 0..=MAX_KID {
        ks.open_collection(&format!("c{}", i), Purpose::Undefined)
            .unwrap();
    }
    let err = ks.open_collection("one_too_many", Purpose::Undefined);
    assert!(matches!(err, Err(Error::TooManyCollections(_, _))));
}

#[test]
fn test_reopen_registry_from_system_table() {
    let engine = Arc::new(MemEngine::new());
    let kid = {
        let ks = Keyspace::open(engine.clone()).unwrap();
        ks.open_collection("users", Purpose::Storage).unwrap()
    };

    let ks2 = Keyspace::open(engine).unwrap();
    assert_eq!(ks2.lookup("users").unwrap(), Some((kid, Purpose::Storage)));
}
