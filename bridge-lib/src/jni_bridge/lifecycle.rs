//! Library load, init and shutdown
//!
//! `JNI_OnLoad` runs on the thread that loaded the library, which is the
//! only place classes of the application class loader are guaranteed to be
//! visible. It stores the `JavaVM` and resolves the class cache. The bridge
//! itself is created by `nativeInit`.

use std::ffi::c_void;

use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jint, JNI_ERR, JNI_FALSE, JNI_TRUE, JNI_VERSION_1_6};
use jni::{JNIEnv, JavaVM};
use log::{error, info};

use super::cache::JavaClasses;
use super::convert::{guard, read_nullable_string};
use super::types::{bridge, runtime_factory, BRIDGE, CLASSES, JAVA_VM};
use crate::error::{Error, Result};
use crate::service::Bridge;
use crate::types::{BridgeConfig, LogConfig};

#[no_mangle]
pub extern "system" fn JNI_OnLoad(vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
    let vm = match unsafe { JavaVM::from_raw(vm) } {
        Ok(vm) => vm,
        Err(_) => return JNI_ERR,
    };
    let classes = vm
        .get_env()
        .map_err(Error::from)
        .and_then(|mut env| JavaClasses::resolve(&mut env));
    match classes {
        Ok(classes) => {
            if CLASSES.init(classes).is_err() {
                error!("class cache was already resolved");
            }
        }
        Err(err) => {
            error!("failed to resolve java classes: {}", err);
            return JNI_ERR;
        }
    }
    if JAVA_VM.init(vm).is_err() {
        error!("JavaVM was already stored");
    }
    JNI_VERSION_1_6
}

#[cfg(target_os = "android")]
fn init_logging(config: &LogConfig) -> Result<()> {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(config.level_filter()?)
            .with_tag(config.tag.clone()),
    );
    Ok(())
}

// Off Android the embedder installs the logger; only the level is applied.
#[cfg(not(target_os = "android"))]
fn init_logging(config: &LogConfig) -> Result<()> {
    log::set_max_level(config.level_filter()?);
    Ok(())
}

/// JNI: create the bridge
///
/// `config` is a TOML `BridgeConfig`; null or empty uses the defaults.
/// Throws `IllegalStateException` when called twice.
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_V_nativeInit(
    mut env: JNIEnv,
    _class: JClass,
    config: JString,
) {
    guard(&mut env, (), |env| {
        let config: BridgeConfig = read_nullable_string(env, &config)?
            .parse()
            .map_err(Error::config)?;
        init_logging(&config.log)?;
        if BRIDGE.is_initialized() {
            return Err(Error::AlreadyInitialized("bridge"));
        }

        info!("Starting v23 bridge...");
        let bridge = match runtime_factory() {
            Some(factory) => Bridge::new(config, |handle, config| factory(handle, config))?,
            None => Bridge::with_loopback(config)?,
        };
        BRIDGE.init(bridge)?;
        info!("v23 bridge initialized");
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_V_nativeIsInitialized(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    if BRIDGE.is_initialized() {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// JNI: stop the runtime and release every handle
#[no_mangle]
pub extern "C" fn Java_io_v_impl_google_V_nativeShutdown(mut env: JNIEnv, _class: JClass) {
    guard(&mut env, (), |_| {
        bridge()?.shutdown();
        Ok(())
    })
}
