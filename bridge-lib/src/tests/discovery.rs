use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{bridge, WAIT};
use crate::error::ids;
use crate::interfaces::ScanHandler;
use crate::runtime::{Advertisement, Update};
use crate::{mutex_lock, Bridge, Handle};

fn ad(interface: &str, address: &str) -> Advertisement {
    Advertisement {
        interface_name: interface.to_string(),
        addresses: vec![address.to_string()],
        ..Default::default()
    }
}

fn next_update(bridge: &Bridge, iter: Handle) -> Update {
    bridge.iterator_next::<Update>(iter).unwrap()
}

#[test]
fn scan_reports_found_and_lost() {
    let bridge = bridge();
    let root = bridge.background_context();
    let first_ctx = bridge.with_cancel(root).unwrap();
    let first = bridge
        .advertise(first_ctx, ad("v.io/x/Echo", "@loopback/1"))
        .unwrap();
    assert_eq!(first.len(), 32);

    let scan_ctx = bridge.with_cancel(root).unwrap();
    let iter = bridge.scan(scan_ctx, "v.io/x/Echo").unwrap();
    match next_update(&bridge, iter) {
        Update::Found(found) => {
            assert_eq!(found.id, first);
            assert_eq!(found.addresses, vec!["@loopback/1".to_string()]);
        }
        other => panic!("unexpected update {:?}", other),
    }

    bridge
        .advertise(root, ad("v.io/x/Store", "@loopback/2"))
        .unwrap();
    let mut third = ad("v.io/x/Echo", "@loopback/3");
    third.id = "echo-3".to_string();
    bridge.advertise(root, third.clone()).unwrap();
    assert_eq!(next_update(&bridge, iter), Update::Found(third));

    bridge.cancel(first_ctx).unwrap();
    match next_update(&bridge, iter) {
        Update::Lost(lost) => assert_eq!(lost.id, first),
        other => panic!("unexpected update {:?}", other),
    }

    bridge.cancel(scan_ctx).unwrap();
    assert!(!bridge.iterator_has_next::<Update>(iter).unwrap());
}

#[test]
fn empty_query_matches_every_interface() {
    let bridge = bridge();
    let ctx = bridge.background_context();
    bridge.advertise(ctx, ad("a.A", "@loopback/1")).unwrap();
    bridge.advertise(ctx, ad("b.B", "@loopback/2")).unwrap();

    let scan_ctx = bridge.with_cancel(ctx).unwrap();
    let iter = bridge.scan(scan_ctx, "").unwrap();
    let mut interfaces: Vec<String> = (0..2)
        .map(|_| next_update(&bridge, iter).advertisement().interface_name.clone())
        .collect();
    interfaces.sort();
    assert_eq!(interfaces, vec!["a.A", "b.B"]);
}

#[test]
fn advertise_validates() {
    let bridge = bridge();
    let ctx = bridge.background_context();
    let err = bridge.advertise(ctx, ad("", "@loopback/1")).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::BAD_ARG);

    let mut dup = ad("a.A", "@loopback/1");
    dup.id = "fixed".to_string();
    assert_eq!(bridge.advertise(ctx, dup.clone()).unwrap(), "fixed");
    let err = bridge.advertise(ctx, dup).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::BAD_STATE);
}

struct Collect(Mutex<mpsc::Sender<Update>>);

impl ScanHandler for Collect {
    fn on_discovered(&self, update: Update) {
        let _ = mutex_lock!(self.0).send(update);
    }
}

#[test]
fn scan_handler_receives_updates() {
    let bridge = bridge();
    let root = bridge.background_context();
    let scan_ctx = bridge.with_cancel(root).unwrap();
    let (tx, rx) = mpsc::channel();
    bridge
        .scan_with_handler(scan_ctx, "h.H", Arc::new(Collect(Mutex::new(tx))))
        .unwrap();

    let ad_ctx = bridge.with_cancel(root).unwrap();
    let id = bridge.advertise(ad_ctx, ad("h.H", "@loopback/4")).unwrap();
    match rx.recv_timeout(WAIT).unwrap() {
        Update::Found(found) => assert_eq!(found.id, id),
        other => panic!("unexpected update {:?}", other),
    }
    bridge.cancel(ad_ctx).unwrap();
    assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Update::Lost(_)));

    // Ending the scan drops the handler, which closes the channel.
    bridge.cancel(scan_ctx).unwrap();
    assert!(matches!(
        rx.recv_timeout(WAIT),
        Err(mpsc::RecvTimeoutError::Disconnected)
    ));
}

fn parked_scan(bridge: &Arc<Bridge>) -> (Handle, mpsc::Receiver<bool>) {
    let ctx = bridge.background_context();
    let iter = bridge.scan(ctx, "nothing.N").unwrap();
    let (tx, rx) = mpsc::channel();
    let reader = Arc::clone(bridge);
    thread::spawn(move || {
        let has_next = reader.iterator_has_next::<Update>(iter).unwrap_or(false);
        let _ = tx.send(has_next);
    });
    thread::sleep(Duration::from_millis(100));
    assert!(matches!(
        rx.try_recv(),
        Err(mpsc::TryRecvError::Empty)
    ));
    (iter, rx)
}

#[test]
fn close_wakes_a_parked_reader() {
    let bridge = Arc::new(bridge());
    let (iter, parked) = parked_scan(&bridge);

    let (done_tx, done_rx) = mpsc::channel();
    let closer = Arc::clone(&bridge);
    thread::spawn(move || {
        let _ = done_tx.send(closer.iterator_close::<Update>(iter).is_ok());
    });
    assert!(done_rx.recv_timeout(WAIT).unwrap());
    assert!(!parked.recv_timeout(WAIT).unwrap());
    assert!(!bridge.iterator_has_next::<Update>(iter).unwrap());
}

#[test]
fn dispose_wakes_a_parked_reader() {
    let bridge = Arc::new(bridge());
    let (iter, parked) = parked_scan(&bridge);

    bridge.dispose(iter).unwrap();
    assert!(!parked.recv_timeout(WAIT).unwrap());
}

#[test]
fn shutdown_withdraws_advertisements() {
    let bridge = bridge();
    let root = bridge.background_context();
    let (tx, rx) = mpsc::channel();
    bridge
        .scan_with_handler(root, "s.S", Arc::new(Collect(Mutex::new(tx))))
        .unwrap();
    let id = bridge.advertise(root, ad("s.S", "@loopback/5")).unwrap();
    assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Update::Found(_)));

    bridge.shutdown();
    match rx.recv_timeout(WAIT).unwrap() {
        Update::Lost(lost) => assert_eq!(lost.id, id),
        other => panic!("unexpected update {:?}", other),
    }

    let ctx = bridge.background_context();
    let err = bridge.advertise(ctx, ad("s.S", "@loopback/6")).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::BAD_STATE);
}
