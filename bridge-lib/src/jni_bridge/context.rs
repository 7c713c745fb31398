//! `io.v.impl.google.context.VContextImpl` natives

use std::time::Duration;

use jni::objects::JClass;
use jni::sys::{jboolean, jlong, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;

use super::convert::guard;
use super::types::{bridge, handle, raw};
use crate::error::Error;

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_context_VContextImpl_nativeBackground(
    mut env: JNIEnv,
    _class: JClass,
) -> jlong {
    guard(&mut env, 0, |_| Ok(raw(bridge()?.background_context())))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_context_VContextImpl_nativeWithCancel(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
) -> jlong {
    guard(&mut env, 0, |_| Ok(raw(bridge()?.with_cancel(handle(ctx))?)))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_context_VContextImpl_nativeWithTimeout(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
    timeout_millis: jlong,
) -> jlong {
    guard(&mut env, 0, |_| {
        if timeout_millis < 0 {
            return Err(Error::invalid_argument("negative timeout"));
        }
        let timeout = Duration::from_millis(timeout_millis as u64);
        Ok(raw(bridge()?.with_timeout(handle(ctx), timeout)?))
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_context_VContextImpl_nativeCancel(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
) {
    guard(&mut env, (), |_| bridge()?.cancel(handle(ctx)))
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_context_VContextImpl_nativeIsCanceled(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
) -> jboolean {
    guard(&mut env, JNI_FALSE, |_| {
        Ok(if bridge()?.is_canceled(handle(ctx))? {
            JNI_TRUE
        } else {
            JNI_FALSE
        })
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_context_VContextImpl_nativeDispose(
    mut env: JNIEnv,
    _class: JClass,
    ctx: jlong,
) {
    guard(&mut env, (), |_| bridge()?.dispose(handle(ctx)))
}
