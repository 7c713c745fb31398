use std::sync::{mpsc, Arc, Weak};
use std::thread;
use std::time::Duration;

use super::{bridge, WAIT};
use crate::error::{ids, Error, Exception, Result, VError};
use crate::interfaces::{Authorizer, CallInfo, Dispatcher, LeafDispatcher, MethodInvoker};
use crate::runtime::{ListenAddr, ListenSpec, ServerState, SIGNATURE_METHOD};
use crate::{Bridge, Callback, Handle};

struct ReadOnly;

impl Authorizer for ReadOnly {
    fn authorize(&self, call: &CallInfo) -> Result<()> {
        if call.method_tags.iter().any(|t| t == "Write") {
            Err(VError::no_access("read only").into())
        } else {
            Ok(())
        }
    }
}

fn store_dispatcher() -> Arc<dyn Dispatcher> {
    let invoker = MethodInvoker::new("Store")
        .method("Echo", 1, &["Read"], |_, args| Ok(args))
        .method("Put", 1, &["Write"], |_, _| Ok(vec![]))
        .method("Where", 0, &["Read"], |call, _| {
            Ok(vec![call.info().suffix.clone().into_bytes()])
        })
        .method("Fail", 0, &[], |_, _| {
            Err(VError::new("app.Overheated", "too hot").into())
        })
        .method("Count", 1, &[], |call, args| {
            for i in 0..args[0][0] {
                call.send(vec![i])?;
            }
            Ok(vec![])
        })
        .method("Sum", 0, &[], |call, _| {
            let mut total = 0u8;
            loop {
                match call.recv() {
                    Ok(item) => total += item[0],
                    Err(err) if err.is_end_of_stream() => break,
                    Err(err) => return Err(err),
                }
            }
            Ok(vec![vec![total]])
        })
        .method("Block", 0, &[], |call, _| {
            while call.recv().is_ok() {}
            Ok(vec![])
        });
    Arc::new(LeafDispatcher::new(
        Arc::new(invoker),
        Some(Arc::new(ReadOnly)),
    ))
}

fn serve(bridge: &Bridge, name: &str) -> Handle {
    let ctx = bridge.background_context();
    let server = bridge.new_server(ctx).unwrap();
    bridge.serve(server, name, store_dispatcher()).unwrap();
    server
}

struct Session {
    client: Handle,
    ctx: Handle,
}

impl Session {
    fn new(bridge: &Bridge) -> Self {
        Session {
            client: bridge.new_client().unwrap(),
            ctx: bridge.background_context(),
        }
    }

    fn call(&self, bridge: &Bridge, name: &str, method: &str, args: Vec<Vec<u8>>) -> Result<Handle> {
        bridge.start_call(self.client, self.ctx, name, method, args)
    }
}

#[test]
fn unary_call_round_trips() {
    let bridge = bridge();
    serve(&bridge, "apps/store");
    let session = Session::new(&bridge);

    let call = session
        .call(&bridge, "apps/store", "Echo", vec![b"hello".to_vec()])
        .unwrap();
    assert_eq!(bridge.call_finish(call).unwrap(), vec![b"hello".to_vec()]);
    bridge.dispose(call).unwrap();

    let call = session
        .call(&bridge, "/apps/store/items/42", "Where", vec![])
        .unwrap();
    assert_eq!(bridge.call_finish(call).unwrap(), vec![b"items/42".to_vec()]);
    assert!(matches!(
        bridge.call_finish(call),
        Err(Error::Native(ref e)) if e.id == ids::BAD_STATE
    ));
}

#[test]
fn server_streams_to_client() {
    let bridge = bridge();
    serve(&bridge, "counter");
    let session = Session::new(&bridge);

    let call = session.call(&bridge, "counter", "Count", vec![vec![3]]).unwrap();
    let mut received = Vec::new();
    loop {
        match bridge.call_recv(call) {
            Ok(item) => received.push(item[0]),
            Err(err) => {
                assert!(err.is_end_of_stream());
                break;
            }
        }
    }
    assert_eq!(received, vec![0, 1, 2]);
    assert_eq!(bridge.call_finish(call).unwrap(), Vec::<Vec<u8>>::new());
}

#[test]
fn client_streams_to_server() {
    let bridge = bridge();
    serve(&bridge, "adder");
    let session = Session::new(&bridge);

    let call = session.call(&bridge, "adder", "Sum", vec![]).unwrap();
    for v in [1u8, 2, 3] {
        bridge.call_send(call, vec![v]).unwrap();
    }
    bridge.call_close_send(call).unwrap();
    assert!(matches!(
        bridge.call_send(call, vec![4]),
        Err(Error::Native(ref e)) if e.id == ids::BAD_STATE
    ));
    assert_eq!(bridge.call_finish(call).unwrap(), vec![vec![6]]);
}

#[test]
fn application_error_keeps_its_id() {
    let bridge = bridge();
    serve(&bridge, "store");
    let session = Session::new(&bridge);

    let call = session.call(&bridge, "store", "Fail", vec![]).unwrap();
    let err = bridge.call_finish(call).unwrap_err();
    assert_eq!(
        err.exception(),
        Exception::VException {
            id: "app.Overheated".to_string(),
            message: "too hot".to_string(),
        }
    );
}

#[test]
fn start_call_failures() {
    let bridge = bridge();
    serve(&bridge, "store");
    let session = Session::new(&bridge);

    let err = session.call(&bridge, "nowhere", "Echo", vec![]).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::NO_EXIST);

    let err = session.call(&bridge, "store", "Shout", vec![]).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::NO_EXIST);

    let err = session.call(&bridge, "store", "Echo", vec![]).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::BAD_ARG);

    let err = session
        .call(&bridge, "store", "Put", vec![b"x".to_vec()])
        .unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::NO_ACCESS);
}

#[test]
fn endpoints_are_addressable_directly() {
    let bridge = bridge();
    let ctx = bridge.background_context();
    let server = bridge.new_server(ctx).unwrap();
    let spec = ListenSpec {
        addrs: vec![ListenAddr {
            protocol: "tcp".to_string(),
            address: "127.0.0.1:0".to_string(),
        }],
        ..Default::default()
    };
    let endpoints = bridge.listen(server, &spec).unwrap();
    assert_eq!(endpoints.len(), 1);
    bridge.serve(server, "", store_dispatcher()).unwrap();

    let status = bridge.server_status(server).unwrap();
    assert_eq!(status.state, ServerState::Active);
    assert!(status.mounts.is_empty());

    let session = Session::new(&bridge);
    let name = format!("{}/deep/suffix", endpoints[0]);
    let call = session.call(&bridge, &name, "Where", vec![]).unwrap();
    assert_eq!(bridge.call_finish(call).unwrap(), vec![b"deep/suffix".to_vec()]);
}

#[test]
fn stopped_server_is_unreachable() {
    let bridge = bridge();
    let server = serve(&bridge, "store");
    let session = Session::new(&bridge);
    assert!(bridge.serve(server, "again", store_dispatcher()).is_err());

    bridge.stop_server(server).unwrap();
    bridge.stop_server(server).unwrap();
    assert_eq!(
        bridge.server_status(server).unwrap().state,
        ServerState::Stopped
    );
    let err = session.call(&bridge, "store", "Echo", vec![vec![1]]).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::NO_EXIST);
}

#[test]
fn finish_async_fires_exactly_once() {
    let bridge = bridge();
    serve(&bridge, "store");
    let session = Session::new(&bridge);
    let call = session
        .call(&bridge, "store", "Echo", vec![b"later".to_vec()])
        .unwrap();

    let (tx, rx) = mpsc::channel();
    let fail_tx = tx.clone();
    bridge.call_finish_async(
        call,
        Callback::new(
            move |out| tx.send(Ok(out)).unwrap(),
            move |err| fail_tx.send(Err(err)).unwrap(),
        ),
    );
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap().unwrap(),
        vec![b"later".to_vec()]
    );
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    let (tx, rx) = mpsc::channel();
    let ok_tx = tx.clone();
    bridge.call_finish_async(
        Handle::from_raw(u64::MAX),
        Callback::new(
            move |_| ok_tx.send(None).unwrap(),
            move |err| tx.send(Some(err)).unwrap(),
        ),
    );
    let err = rx.recv_timeout(WAIT).unwrap().unwrap();
    assert!(matches!(err, Error::InvalidHandle(_)));
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn canceled_context_interrupts_a_blocked_recv() {
    let bridge = bridge();
    serve(&bridge, "store");
    let client = bridge.new_client().unwrap();
    let root = bridge.background_context();
    let ctx = bridge.with_cancel(root).unwrap();
    let call = bridge.start_call(client, ctx, "store", "Block", vec![]).unwrap();

    let bridge = Arc::new(bridge);
    let canceler = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            bridge.cancel(ctx).unwrap();
        })
    };
    let err = bridge.call_recv(call).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::CANCELED);
    canceler.join().unwrap();

    // Releasing the call closes its send side and lets the server return.
    bridge.dispose(call).unwrap();
}

#[test]
fn deadline_interrupts_a_blocked_recv() {
    let bridge = bridge();
    serve(&bridge, "store");
    let client = bridge.new_client().unwrap();
    let root = bridge.background_context();
    let ctx = bridge.with_timeout(root, Duration::from_millis(30)).unwrap();
    let call = bridge.start_call(client, ctx, "store", "Block", vec![]).unwrap();

    let err = bridge.call_recv(call).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::TIMEOUT);
    bridge.dispose(call).unwrap();

    thread::sleep(Duration::from_millis(10));
    let err = bridge.start_call(client, ctx, "store", "Echo", vec![vec![1]]).unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::TIMEOUT);
}

#[test]
fn closed_client_rejects_calls() {
    let bridge = bridge();
    serve(&bridge, "store");
    let client = bridge.new_client().unwrap();
    let ctx = bridge.background_context();
    bridge.close_client(client).unwrap();
    assert!(matches!(
        bridge.start_call(client, ctx, "store", "Echo", vec![vec![1]]),
        Err(Error::InvalidHandle(_))
    ));
}

#[test]
fn server_calls_are_reachable_through_handles() {
    let bridge = Arc::new(bridge());
    let weak: Weak<Bridge> = Arc::downgrade(&bridge);
    let invoker = MethodInvoker::new("Relay").method("Relay", 0, &[], move |call, _| {
        let bridge = weak
            .upgrade()
            .ok_or_else(|| Error::from(VError::bad_state("bridge is gone")))?;
        let pinned = bridge.pin_server_call(call);
        let info = bridge.server_call_info(pinned.handle())?;
        bridge.server_call_send(pinned.handle(), info.method.into_bytes())?;
        let item = bridge.server_call_recv(pinned.handle())?;
        Ok(vec![item])
    });
    let ctx = bridge.background_context();
    let server = bridge.new_server(ctx).unwrap();
    bridge
        .serve(
            server,
            "relay",
            Arc::new(LeafDispatcher::new(Arc::new(invoker), None)),
        )
        .unwrap();
    let before = bridge.registry().len();

    let session = Session::new(&bridge);
    let call = session.call(&bridge, "relay", "Relay", vec![]).unwrap();
    assert_eq!(bridge.call_recv(call).unwrap(), b"Relay".to_vec());
    bridge.call_send(call, b"back".to_vec()).unwrap();
    assert_eq!(bridge.call_finish(call).unwrap(), vec![b"back".to_vec()]);

    bridge.dispose(call).unwrap();
    bridge.dispose(session.client).unwrap();
    bridge.dispose(session.ctx).unwrap();
    // The server call was unpinned when the invocation returned.
    assert_eq!(bridge.registry().len(), before);
}

#[test]
fn signature_is_served_by_the_invoker() {
    let bridge = bridge();
    serve(&bridge, "store");
    let session = Session::new(&bridge);

    let sig = bridge.signature(session.client, session.ctx, "store/a").unwrap();
    assert_eq!(sig.len(), 1);
    assert_eq!(sig[0].name, "Store");
    let methods: Vec<&str> = sig[0].methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(methods, vec!["Block", "Count", "Echo", "Fail", "Put", "Sum", "Where"]);
    let put = sig[0].methods.iter().find(|m| m.name == "Put").unwrap();
    assert_eq!(put.tags, vec!["Write".to_string()]);

    let err = session
        .call(&bridge, "store", SIGNATURE_METHOD, vec![b"x".to_vec()])
        .unwrap_err();
    assert_eq!(err.verror().unwrap().id, ids::BAD_ARG);
    assert!(matches!(
        bridge.signature(session.client, session.ctx, "nowhere"),
        Err(Error::Native(e)) if e.id == ids::NO_EXIST
    ));
}
