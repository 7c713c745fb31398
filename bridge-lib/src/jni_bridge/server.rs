//! Server natives: `io.v.impl.google.rpc.ServerImpl` and `ServerCallImpl`

use std::ptr;
use std::sync::Arc;

use jni::objects::{JByteArray, JClass, JObject, JString};
use jni::sys::{jbyteArray, jlong, jobjectArray, jstring};
use jni::JNIEnv;
use log::info;

use super::convert::{from_json, guard, new_string_array, read_bytes, read_nullable_string, to_json};
use super::inbound::JavaDispatcher;
use super::types::{bridge, handle, raw};
use crate::error::Error;
use crate::runtime::ListenSpec;

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerImpl_nativeNew(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
) -> jlong {
    guard(&mut env, 0, |_| Ok(raw(bridge()?.new_server(handle(ctx))?)))
}

/// `spec` is a JSON `ListenSpec`; null listens with the defaults.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerImpl_nativeListen(
    mut env: JNIEnv,
    _class: JClass,
    server: jlong,
    spec: JString,
) -> jobjectArray {
    guard(&mut env, ptr::null_mut(), |env| {
        let spec: ListenSpec = if spec.is_null() {
            ListenSpec::default()
        } else {
            from_json(env, &spec)?
        };
        let endpoints = bridge()?.listen(handle(server), &spec)?;
        Ok(new_string_array(env, &endpoints)?.into_raw())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerImpl_nativeServe(
    mut env: JNIEnv,
    _class: JClass,
    server: jlong,
    name: JString,
    dispatcher: JObject,
) {
    guard(&mut env, (), |env| {
        if dispatcher.is_null() {
            return Err(Error::invalid_argument("null dispatcher"));
        }
        let name = read_nullable_string(env, &name)?;
        let dispatcher = JavaDispatcher::new(env.new_global_ref(&dispatcher)?);
        bridge()?.serve(handle(server), &name, Arc::new(dispatcher))?;
        info!("java dispatcher serving {:?}", name);
        Ok(())
    })
}

/// Returns the server status as JSON.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerImpl_nativeGetStatus(
    mut env: JNIEnv,
    _class: JClass,
    server: jlong,
) -> jstring {
    guard(&mut env, ptr::null_mut(), |env| {
        let status = bridge()?.server_status(handle(server))?;
        Ok(to_json(env, &status)?.into_raw())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerImpl_nativeStop(
    mut env: JNIEnv,
    _class: JClass,
    server: jlong,
) {
    guard(&mut env, (), |_| bridge()?.stop_server(handle(server)))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerImpl_nativeDispose(
    mut env: JNIEnv,
    _class: JClass,
    server: jlong,
) {
    guard(&mut env, (), |_| bridge()?.dispose(handle(server)))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerCallImpl_nativeSend(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
    item: JByteArray,
) {
    guard(&mut env, (), |env| {
        let item = read_bytes(env, &item)?;
        bridge()?.server_call_send(handle(call), item)
    })
}

/// Throws `java.io.EOFException` once the client has closed its side.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ServerCallImpl_nativeRecv(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
) -> jbyteArray {
    guard(&mut env, ptr::null_mut(), |env| {
        let item = bridge()?.server_call_recv(handle(call))?;
        Ok(env.byte_array_from_slice(&item)?.into_raw())
    })
}
