//! Java implementations of the interfaces the runtime calls into.
//!
//! Each adapter holds a global reference to the Java object, attaches the
//! calling thread for the duration of one call and goes through the cached
//! method ids.

use std::sync::{mpsc, Arc};

use jni::objects::{GlobalRef, JClass, JObjectArray, JString, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::sys::jint;
use log::{debug, warn};

use super::callbacks::native_callback;
use super::convert::{call_java, new_byte_arrays, read_nullable_string, read_string_array, to_json, with_env};
use super::types::{bridge, raw};
use crate::error::{Error, Result, VError};
use crate::interfaces::{
    Authorizer, CallInfo, Dispatcher, Interface, Invoker, Lookup, MethodInfo, ScanHandler,
    ServerCall,
};
use crate::runtime::Update;
use crate::service::CallCallback;
use crate::types::Payload;

pub struct JavaDispatcher {
    dispatcher: GlobalRef,
}

impl JavaDispatcher {
    pub fn new(dispatcher: GlobalRef) -> Self {
        JavaDispatcher { dispatcher }
    }
}

impl Dispatcher for JavaDispatcher {
    fn lookup(&self, suffix: &str) -> Result<Option<Lookup>> {
        with_env(|env, classes| {
            let jsuffix = env.new_string(suffix)?;
            let found = call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    self.dispatcher.as_obj(),
                    classes.dispatcher_lookup,
                    ReturnType::Object,
                    &[JValue::Object(&jsuffix).as_jni()],
                )
            })?
            .l()?;
            if found.is_null() {
                return Ok(None);
            }
            let invoker = call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    &found,
                    classes.service_object_get_invoker,
                    ReturnType::Object,
                    &[],
                )
            })?
            .l()?;
            if invoker.is_null() {
                return Ok(None);
            }
            let authorizer = call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    &found,
                    classes.service_object_get_authorizer,
                    ReturnType::Object,
                    &[],
                )
            })?
            .l()?;
            let authorizer: Option<Arc<dyn Authorizer>> = if authorizer.is_null() {
                None
            } else {
                Some(Arc::new(JavaAuthorizer::new(env.new_global_ref(&authorizer)?)))
            };
            Ok(Some(Lookup {
                invoker: Arc::new(JavaInvoker::new(env.new_global_ref(&invoker)?)),
                authorizer,
            }))
        })
    }
}

pub struct JavaInvoker {
    invoker: GlobalRef,
}

impl JavaInvoker {
    pub fn new(invoker: GlobalRef) -> Self {
        JavaInvoker { invoker }
    }
}

impl Invoker for JavaInvoker {
    fn prepare(&self, method: &str, num_args: usize) -> Result<MethodInfo> {
        with_env(|env, classes| {
            let jmethod = env.new_string(method)?;
            let tags = call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    self.invoker.as_obj(),
                    classes.invoker_prepare,
                    ReturnType::Array,
                    &[
                        JValue::Object(&jmethod).as_jni(),
                        JValue::Int(num_args as jint).as_jni(),
                    ],
                )
            })?
            .l()?;
            Ok(MethodInfo {
                num_in_args: num_args,
                tags: read_string_array(env, &JObjectArray::from(tags))?,
            })
        })
    }

    /// Hands the call to Java with a `NativeCallback` and parks this worker
    /// until Java completes or releases it.
    fn invoke(
        &self,
        call: Arc<dyn ServerCall>,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Vec<Payload>> {
        let bridge = bridge()?;
        let info = call.info().clone();
        let server_call = bridge.pin_server_call(call);

        let (tx, rx) = mpsc::channel();
        let fail_tx = tx.clone();
        let callback = CallCallback::new(
            move |results| {
                let _ = tx.send(Ok(results));
            },
            move |err| {
                let _ = fail_tx.send(Err(err));
            },
        );

        let pending = with_env(|env, classes| {
            let jinfo = to_json(env, &info)?;
            let jcall = unsafe {
                env.new_object_unchecked(
                    <&JClass>::from(classes.server_call.as_obj()),
                    classes.server_call_ctor,
                    &[
                        JValue::Long(raw(server_call.handle())).as_jni(),
                        JValue::Object(&jinfo).as_jni(),
                    ],
                )
            }?;
            let jmethod = env.new_string(method)?;
            let jargs = new_byte_arrays(env, &args)?;
            let (jcallback, pending) = native_callback(env, classes, bridge, callback)?;
            call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    self.invoker.as_obj(),
                    classes.invoker_invoke,
                    ReturnType::Primitive(Primitive::Void),
                    &[
                        JValue::Object(&jcall).as_jni(),
                        JValue::Object(&jmethod).as_jni(),
                        JValue::Object(&jargs).as_jni(),
                        JValue::Object(&jcallback).as_jni(),
                    ],
                )
            })?;
            Ok(pending)
        })?;
        // Java owns the callback now.
        let _ = pending.into_raw();

        let result = rx
            .recv()
            .unwrap_or_else(|_| Err(VError::canceled().into()));
        debug!("java method {} returned, ok: {}", method, result.is_ok());
        drop(server_call);
        result
    }

    fn signature(&self) -> Result<Vec<Interface>> {
        with_env(|env, classes| {
            let json = call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    self.invoker.as_obj(),
                    classes.invoker_get_signature,
                    ReturnType::Object,
                    &[],
                )
            })?
            .l()?;
            let json = read_nullable_string(env, &JString::from(json))?;
            if json.is_empty() {
                return Ok(Vec::new());
            }
            serde_json::from_str(&json).map_err(Error::from)
        })
    }
}

pub struct JavaAuthorizer {
    authorizer: GlobalRef,
}

impl JavaAuthorizer {
    pub fn new(authorizer: GlobalRef) -> Self {
        JavaAuthorizer { authorizer }
    }
}

impl Authorizer for JavaAuthorizer {
    fn authorize(&self, call: &CallInfo) -> Result<()> {
        with_env(|env, classes| {
            let jcall = to_json(env, call)?;
            call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    self.authorizer.as_obj(),
                    classes.authorizer_authorize,
                    ReturnType::Primitive(Primitive::Void),
                    &[JValue::Object(&jcall).as_jni()],
                )
            })?;
            Ok(())
        })
    }
}

pub struct JavaScanHandler {
    handler: GlobalRef,
}

impl JavaScanHandler {
    pub fn new(handler: GlobalRef) -> Self {
        JavaScanHandler { handler }
    }
}

impl ScanHandler for JavaScanHandler {
    fn on_discovered(&self, update: Update) {
        let delivered = with_env(|env, classes| {
            let jupdate = to_json(env, &update)?;
            call_java(env, |env| unsafe {
                env.call_method_unchecked(
                    self.handler.as_obj(),
                    classes.scan_handler_on_discovered,
                    ReturnType::Primitive(Primitive::Void),
                    &[JValue::Object(&jupdate).as_jni()],
                )
            })?;
            Ok(())
        });
        if let Err(err) = delivered {
            warn!("scan handler failed for {}: {}", update.advertisement().id, err);
        }
    }
}
