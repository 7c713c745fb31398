//! Global state for the JNI bridge
//!
//! Everything here is set once and lives for the rest of the process.

use std::sync::Arc;

use jni::sys::jlong;
use jni::JavaVM;
use tokio::runtime::Handle as RuntimeHandle;

use super::cache::JavaClasses;
use crate::error::Result;
use crate::handles::Handle;
use crate::runtime::Runtime;
use crate::service::Bridge;
use crate::types::{BridgeConfig, InitCell};

/// Builds the v23 runtime the bridge runs against.
pub type RuntimeFactory =
    Box<dyn Fn(RuntimeHandle, &BridgeConfig) -> Arc<dyn Runtime> + Send + Sync>;

/// Stored by `JNI_OnLoad`.
pub static JAVA_VM: InitCell<JavaVM> = InitCell::new("JavaVM");

/// Resolved by `JNI_OnLoad` on the class-loader thread.
pub static CLASSES: InitCell<JavaClasses> = InitCell::new("java class cache");

/// Created by `nativeInit`.
pub static BRIDGE: InitCell<Bridge> = InitCell::new("bridge");

static RUNTIME_FACTORY: InitCell<RuntimeFactory> = InitCell::new("runtime factory");

/// Installs the runtime `nativeInit` builds. Without one the bridge runs on
/// the loopback runtime.
pub fn install_runtime(factory: RuntimeFactory) -> Result<()> {
    RUNTIME_FACTORY.init(factory)
}

pub(crate) fn runtime_factory() -> Option<&'static RuntimeFactory> {
    RUNTIME_FACTORY.get().ok()
}

pub fn bridge() -> Result<&'static Bridge> {
    BRIDGE.get()
}

#[inline]
pub(crate) fn handle(raw: jlong) -> Handle {
    Handle::from_raw(raw as u64)
}

#[inline]
pub(crate) fn raw(handle: Handle) -> jlong {
    handle.raw() as jlong
}
