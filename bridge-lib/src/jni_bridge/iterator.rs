//! `io.v.impl.google.channel.ChannelIterator` natives
//!
//! Items were already converted to Java objects by the forwarding task;
//! these calls only block for them and hand out local references.

use std::ptr;

use jni::objects::{GlobalRef, JClass};
use jni::sys::{jboolean, jlong, jobject, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;

use super::convert::guard;
use super::types::{bridge, handle};

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_channel_ChannelIterator_nativeHasNext(
    mut env: JNIEnv,
    _class: JClass,
    iter: jlong,
) -> jboolean {
    guard(&mut env, JNI_FALSE, |_| {
        Ok(if bridge()?.iterator_has_next::<GlobalRef>(handle(iter))? {
            JNI_TRUE
        } else {
            JNI_FALSE
        })
    })
}

/// Throws `java.io.EOFException` when the iterator is exhausted.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_channel_ChannelIterator_nativeNext(
    mut env: JNIEnv,
    _class: JClass,
    iter: jlong,
) -> jobject {
    guard(&mut env, ptr::null_mut(), |env| {
        let item = bridge()?.iterator_next::<GlobalRef>(handle(iter))?;
        Ok(env.new_local_ref(item.as_obj())?.into_raw())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_channel_ChannelIterator_nativeClose(
    mut env: JNIEnv,
    _class: JClass,
    iter: jlong,
) {
    guard(&mut env, (), |_| {
        bridge()?.iterator_close::<GlobalRef>(handle(iter))
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_channel_ChannelIterator_nativeDispose(
    mut env: JNIEnv,
    _class: JClass,
    iter: jlong,
) {
    guard(&mut env, (), |_| bridge()?.dispose(handle(iter)))
}
