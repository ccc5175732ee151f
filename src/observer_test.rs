use super::*;
use crate::kv::mem::MemEngine;
use crate::kv::Engine;

#[derive(Debug, PartialEq, Eq, Clone)]
struct Ev(u32);

#[test]
fn test_callbacks_fire_in_registration_order() {
    let bus: Arc<ObserverBus<Ev>> = Arc::new(ObserverBus::new());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let s1 = seen.clone();
    let _t1 = bus.register(move |ev: &Ev, _batch: &mut Batch| {
        s1.lock().unwrap().push(("first", ev.0));
        Ok(true)
    });
    let s2 = seen.clone();
    let _t2 = bus.register(move |ev: &Ev, _batch: &mut Batch| {
        s2.lock().unwrap().push(("second", ev.0));
        Ok(true)
    });

    let mut batch = Batch::new();
    bus.emit(&Ev(7), &mut batch).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
}

#[test]
fn test_dropping_ticket_unregisters() {
    let bus: Arc<ObserverBus<Ev>> = Arc::new(ObserverBus::new());
    let ticket = bus.register(|_ev: &Ev, _batch: &mut Batch| Ok(true));
    assert_eq!(bus.len(), 1);
    drop(ticket);
    assert_eq!(bus.len(), 0);
}

#[test]
fn test_callback_returning_false_is_pruned_after_broadcast() {
    let bus: Arc<ObserverBus<Ev>> = Arc::new(ObserverBus::new());
    let _ticket = bus.register(|_ev: &Ev, _batch: &mut Batch| Ok(false));
    assert_eq!(bus.len(), 1);

    let mut batch = Batch::new();
    bus.emit(&Ev(1), &mut batch).unwrap();

    assert!(bus.is_empty(), "one-shot observer must be pruned after it fires");
}

#[test]
fn test_error_from_observer_aborts_emit_and_preserves_remaining_observers() {
    let bus: Arc<ObserverBus<Ev>> = Arc::new(ObserverBus::new());
    let ran = Arc::new(std::sync::Mutex::new(false));

    let _failing = bus.register(|_ev: &Ev, _batch: &mut Batch| {
        crate::err_at!(InvalidInput, msg: "observer refused event")
    });
    let ran2 = ran.clone();
    let _never_runs = bus.register(move |_ev: &Ev, _batch: &mut Batch| {
        *ran2.lock().unwrap() = true;
        Ok(true)
    });

    let mut batch = Batch::new();
    let err = bus.emit(&Ev(1), &mut batch);
    assert!(err.is_err());
    assert!(!*ran.lock().unwrap(), "later observers must not run once an earlier one errors");
    assert_eq!(bus.len(), 2, "a failed emit must not prune any observer");
}

#[test]
fn test_observer_can_append_to_the_carrying_batch() {
    let bus: Arc<ObserverBus<Ev>> = Arc::new(ObserverBus::new());
    let _ticket = bus.register(|ev: &Ev, batch: &mut Batch| {
        batch.put(format!("derived:{}", ev.0).into_bytes(), b"1".to_vec());
        Ok(true)
    });

    let engine = MemEngine::new();
    let mut batch = Batch::new();
    bus.emit(&Ev(42), &mut batch).unwrap();
    batch.commit(&engine).unwrap();

    assert_eq!(engine.get(b"derived:42").unwrap(), Some(b"1".to_vec()));
}
