//! Callbacks in both directions
//!
//! `java_callback` wraps an `io.v.v23.rpc.Callback` so native code can
//! complete it. `NativeCallback` is the Java object handed to Java code in
//! place of a pinned native callback; its natives complete or release it.

use jni::objects::{GlobalRef, JClass, JObject, JObjectArray, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::jlong;
use jni::JNIEnv;
use log::{debug, warn};

use super::cache::JavaClasses;
use super::convert::{call_java, guard, new_byte_arrays, new_vexception, non_null, read_byte_arrays, verror_from_throwable, with_env};
use super::types::{bridge, handle, raw};
use crate::error::Result;
use crate::handles::{Handle, Pinned};
use crate::service::{Bridge, CallCallback};

fn deliver<F>(callback: &GlobalRef, what: &str, f: F)
where
    F: for<'a> FnOnce(&mut JNIEnv<'a>, &'static JavaClasses, &GlobalRef) -> Result<()>,
{
    let delivered = with_env(|env, classes| f(env, classes, callback));
    if let Err(err) = delivered {
        warn!("could not deliver {} to java callback: {}", what, err);
    }
}

/// Wraps a Java callback. Exactly one of its methods will be called.
pub(crate) fn java_callback(env: &mut JNIEnv, callback: &JObject) -> Result<CallCallback> {
    non_null(callback, "callback")?;
    let on_success = env.new_global_ref(callback)?;
    let on_failure = on_success.clone();
    Ok(CallCallback::new(
        move |results| {
            deliver(&on_success, "results", |env, classes, callback| {
                let results = new_byte_arrays(env, &results)?;
                call_java(env, |env| unsafe {
                    env.call_method_unchecked(
                        callback.as_obj(),
                        classes.callback_on_success,
                        ReturnType::Primitive(Primitive::Void),
                        &[JValue::Object(&results).as_jni()],
                    )
                })?;
                Ok(())
            })
        },
        move |err| {
            let err = err.into_verror();
            deliver(&on_failure, "error", |env, classes, callback| {
                let exception = new_vexception(env, &err)?;
                call_java(env, |env| unsafe {
                    env.call_method_unchecked(
                        callback.as_obj(),
                        classes.callback_on_failure,
                        ReturnType::Primitive(Primitive::Void),
                        &[JValue::Object(&exception).as_jni()],
                    )
                })?;
                Ok(())
            })
        },
    ))
}

/// Pins `callback` and wraps its handle in a Java `NativeCallback`. The
/// guard is returned so the caller decides whether Java now owns it.
pub(crate) fn native_callback<'local>(
    env: &mut JNIEnv<'local>,
    classes: &JavaClasses,
    bridge: &Bridge,
    callback: CallCallback,
) -> Result<(JObject<'local>, Pinned<CallCallback>)> {
    let pinned = Pinned::new(bridge.registry(), callback);
    let object = unsafe {
        env.new_object_unchecked(
            <&JClass>::from(classes.native_callback.as_obj()),
            classes.native_callback_ctor,
            &[JValue::Long(raw(pinned.handle())).as_jni()],
        )
    }?;
    Ok((object, pinned))
}

fn complete(native: Handle, result: Result<Vec<Vec<u8>>>) -> Result<()> {
    if !bridge()?.complete_callback(native, result)? {
        debug!("native callback {} had already completed", native);
    }
    Ok(())
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_NativeCallback_nativeOnSuccess(
    mut env: JNIEnv,
    _class: JClass,
    native: jlong,
    results: JObjectArray,
) {
    guard(&mut env, (), |env| {
        let results = read_byte_arrays(env, &results)?;
        complete(handle(native), Ok(results))
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_NativeCallback_nativeOnFailure(
    mut env: JNIEnv,
    _class: JClass,
    native: jlong,
    error: JObject,
) {
    guard(&mut env, (), |env| {
        let err = verror_from_throwable(env, &error)?;
        complete(handle(native), Err(err.into()))
    })
}

/// Releases a callback Java will never complete; it reports cancellation.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_rpc_NativeCallback_nativeDispose(
    mut env: JNIEnv,
    _class: JClass,
    native: jlong,
) {
    guard(&mut env, (), |_| {
        let native = handle(native);
        if bridge()?.registry().contains(native) {
            bridge()?.dispose(native)?;
        }
        Ok(())
    })
}
