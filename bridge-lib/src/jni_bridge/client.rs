//! Client natives: `io.v.impl.google.rpc.ClientImpl` and `ClientCallImpl`

use jni::objects::{JByteArray, JClass, JObject, JObjectArray, JString};
use jni::sys::{jbyteArray, jlong, jobjectArray, jstring};
use jni::JNIEnv;
use log::debug;
use std::ptr;

use super::callbacks::java_callback;
use super::convert::{guard, new_byte_arrays, read_byte_arrays, read_bytes, read_string, to_json};
use super::types::{bridge, handle, raw};

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientImpl_nativeNew(
    mut env: JNIEnv,
    _class: JClass,
) -> jlong {
    guard(&mut env, 0, |_| Ok(raw(bridge()?.new_client()?)))
}

/// Starts a call; the returned handle belongs to a `ClientCallImpl`.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientImpl_nativeStartCall(
    mut env: JNIEnv,
    _class: JClass,
    client: jlong,
    ctx: jlong,
    name: JString,
    method: JString,
    args: JObjectArray,
) -> jlong {
    guard(&mut env, 0, |env| {
        let name = read_string(env, &name)?;
        let method = read_string(env, &method)?;
        let args = read_byte_arrays(env, &args)?;
        debug!("nativeStartCall {}.{}", name, method);
        let call = bridge()?.start_call(handle(client), handle(ctx), &name, &method, args)?;
        Ok(raw(call))
    })
}

/// Returns the signature of the object served at `name` as JSON.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientImpl_nativeGetSignature(
    mut env: JNIEnv,
    _class: JClass,
    client: jlong,
    ctx: jlong,
    name: JString,
) -> jstring {
    guard(&mut env, ptr::null_mut(), |env| {
        let name = read_string(env, &name)?;
        let sig = bridge()?.signature(handle(client), handle(ctx), &name)?;
        Ok(to_json(env, &sig)?.into_raw())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientImpl_nativeClose(
    mut env: JNIEnv,
    _class: JClass,
    client: jlong,
) {
    guard(&mut env, (), |_| bridge()?.close_client(handle(client)))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientCallImpl_nativeSend(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
    item: JByteArray,
) {
    guard(&mut env, (), |env| {
        let item = read_bytes(env, &item)?;
        bridge()?.call_send(handle(call), item)
    })
}

/// Throws `java.io.EOFException` once the server has stopped sending.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientCallImpl_nativeRecv(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
) -> jbyteArray {
    guard(&mut env, ptr::null_mut(), |env| {
        let item = bridge()?.call_recv(handle(call))?;
        Ok(env.byte_array_from_slice(&item)?.into_raw())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientCallImpl_nativeCloseSend(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
) {
    guard(&mut env, (), |_| bridge()?.call_close_send(handle(call)))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientCallImpl_nativeFinish(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
) -> jobjectArray {
    guard(&mut env, ptr::null_mut(), |env| {
        let results = bridge()?.call_finish(handle(call))?;
        Ok(new_byte_arrays(env, &results)?.into_raw())
    })
}

/// Returns at once; `callback` receives the results or the error.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientCallImpl_nativeFinishAsync(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
    callback: JObject,
) {
    guard(&mut env, (), |env| {
        let bridge = bridge()?;
        let callback = java_callback(env, &callback)?;
        bridge.call_finish_async(handle(call), callback);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_ClientCallImpl_nativeDispose(
    mut env: JNIEnv,
    _class: JClass,
    call: jlong,
) {
    guard(&mut env, (), |_| bridge()?.dispose(handle(call)))
}
