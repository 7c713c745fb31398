mod discovery;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ids, Error};
use crate::{Bridge, BridgeConfig, Callback};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn bridge() -> Bridge {
    init_logger();
    Bridge::with_loopback(BridgeConfig::default()).unwrap()
}

pub(crate) const WAIT: Duration = Duration::from_secs(5);

#[test]
fn invalid_config_is_rejected() {
    let mut config = BridgeConfig::default();
    config.runtime.worker_threads = 0;
    assert!(matches!(
        Bridge::with_loopback(config),
        Err(Error::Config(_))
    ));
}

#[test]
fn contexts_are_handles() {
    let bridge = bridge();
    let root = bridge.background_context();
    let child = bridge.with_cancel(root).unwrap();
    let timed = bridge.with_timeout(child, Duration::from_secs(60)).unwrap();
    assert!(!bridge.is_canceled(timed).unwrap());

    bridge.cancel(child).unwrap();
    assert!(bridge.is_canceled(child).unwrap());
    assert!(bridge.is_canceled(timed).unwrap());
    assert!(!bridge.is_canceled(root).unwrap());

    bridge.dispose(child).unwrap();
    assert!(matches!(bridge.cancel(child), Err(Error::InvalidHandle(_))));
    // Derived contexts outlive the handle of their parent.
    assert!(bridge.is_canceled(timed).unwrap());
}

#[test]
fn wrong_handle_kind_is_a_type_mismatch() {
    let bridge = bridge();
    let ctx = bridge.background_context();
    let err = bridge
        .start_call(ctx, ctx, "echo", "Echo", vec![])
        .unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[test]
fn pinned_callback_completes_once() {
    let bridge = bridge();
    let (tx, rx) = std::sync::mpsc::channel();
    let fail_tx = tx.clone();
    let handle = bridge.pin_callback(Callback::new(
        move |out: Vec<Vec<u8>>| tx.send(Ok(out)).unwrap(),
        move |err| fail_tx.send(Err(err)).unwrap(),
    ));
    assert!(bridge
        .complete_callback(handle, Ok(vec![b"done".to_vec()]))
        .unwrap());
    assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), vec![b"done".to_vec()]);

    assert!(matches!(
        bridge.complete_callback(handle, Ok(vec![])),
        Err(Error::InvalidHandle(_))
    ));
    assert!(rx.try_recv().is_err());
}

#[test]
fn shutdown_releases_every_handle() {
    let bridge = bridge();
    let ctx = bridge.background_context();
    let client = bridge.new_client().unwrap();
    let (tx, rx) = std::sync::mpsc::channel();
    let ok_tx = tx.clone();
    let callback = bridge.pin_callback(Callback::new(
        move |_| ok_tx.send(None).unwrap(),
        move |err| tx.send(Some(err)).unwrap(),
    ));
    assert_eq!(bridge.registry().len(), 3);

    bridge.shutdown();
    assert!(bridge.registry().is_empty());
    assert!(matches!(bridge.new_server(ctx), Err(Error::InvalidHandle(_))));
    assert!(matches!(bridge.close_client(client), Err(Error::InvalidHandle(_))));
    assert!(bridge.complete_callback(callback, Ok(vec![])).is_err());

    // The released callback reports cancellation instead of vanishing.
    let err = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert_eq!(err.verror().unwrap().id, ids::CANCELED);
}

#[test]
fn bridge_is_shareable_across_threads() {
    let bridge = Arc::new(bridge());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let ctx = bridge.background_context();
                    let child = bridge.with_cancel(ctx).unwrap();
                    bridge.dispose(child).unwrap();
                    bridge.dispose(ctx).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(bridge.registry().is_empty());
}
