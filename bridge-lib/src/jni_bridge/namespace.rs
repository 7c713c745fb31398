//! Namespace and discovery natives
//!
//! Glob and scan results reach Java through a `ChannelIterator` handle. Each
//! item is serialized to a JSON string on the forwarding task.

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use jni::objects::{JClass, JObject, JString};
use jni::sys::{jlong, jstring};
use jni::JNIEnv;

use super::convert::{from_json, global_json, guard, read_nullable_string, read_string, to_json};
use super::inbound::JavaScanHandler;
use super::types::{bridge, handle, raw};
use crate::error::Error;
use crate::runtime::{Advertisement, GlobReply, Update};

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_namespace_NamespaceImpl_nativeGlob(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    pattern: JString,
) -> jlong {
    guard(&mut env, 0, |env| {
        let pattern = read_string(env, &pattern)?;
        let iter = bridge()?.glob_with(handle(ctx), &pattern, |reply: GlobReply| {
            global_json(&reply)
        })?;
        Ok(raw(iter))
    })
}

/// A zero `ttl_millis` keeps the mount until it is removed.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_namespace_NamespaceImpl_nativeMount(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    name: JString,
    server: JString,
    ttl_millis: jlong,
) {
    guard(&mut env, (), |env| {
        if ttl_millis < 0 {
            return Err(Error::invalid_argument("negative ttl"));
        }
        let name = read_string(env, &name)?;
        let server = read_string(env, &server)?;
        bridge()?.mount(
            handle(ctx),
            &name,
            &server,
            Duration::from_millis(ttl_millis as u64),
        )
    })
}

/// A null or empty `server` removes every server mounted at `name`.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_namespace_NamespaceImpl_nativeUnmount(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    name: JString,
    server: JString,
) {
    guard(&mut env, (), |env| {
        let name = read_string(env, &name)?;
        let server = read_nullable_string(env, &server)?;
        bridge()?.unmount(handle(ctx), &name, &server)
    })
}

/// Returns the `MountEntry` as JSON.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_namespace_NamespaceImpl_nativeResolve(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    name: JString,
) -> jstring {
    guard(&mut env, ptr::null_mut(), |env| {
        let name = read_string(env, &name)?;
        let entry = bridge()?.resolve(handle(ctx), &name)?;
        Ok(to_json(env, &entry)?.into_raw())
    })
}

/// `ad` is a JSON `Advertisement`; returns its id.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_discovery_DiscoveryImpl_nativeAdvertise(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    ad: JString,
) -> jstring {
    guard(&mut env, ptr::null_mut(), |env| {
        let ad: Advertisement = from_json(env, &ad)?;
        let id = bridge()?.advertise(handle(ctx), ad)?;
        Ok(env.new_string(id)?.into_raw())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_discovery_DiscoveryImpl_nativeScan(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    query: JString,
) -> jlong {
    guard(&mut env, 0, |env| {
        let query = read_nullable_string(env, &query)?;
        let iter = bridge()?.scan_with(handle(ctx), &query, |update: Update| {
            global_json(&update)
        })?;
        Ok(raw(iter))
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_discovery_DiscoveryImpl_nativeScanWithHandler(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    query: JString,
    handler: JObject,
) {
    guard(&mut env, (), |env| {
        if handler.is_null() {
            return Err(Error::invalid_argument("null scan handler"));
        }
        let query = read_nullable_string(env, &query)?;
        let handler = JavaScanHandler::new(env.new_global_ref(&handler)?);
        bridge()?.scan_with_handler(handle(ctx), &query, Arc::new(handler))
    })
}
