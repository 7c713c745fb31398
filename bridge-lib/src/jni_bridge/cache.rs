//! Java classes and method ids used by the bridge.
//!
//! Classes must be found from a thread that sees the application class
//! loader, so everything is resolved once in `JNI_OnLoad` and pinned with
//! global references. Entry points and inbound adapters only use the ids
//! cached here.

use jni::objects::{GlobalRef, JClass, JMethodID};
use jni::JNIEnv;
use log::debug;

use crate::error::{Error, Result};

const STRING: &str = "java/lang/String";
const BYTE_ARRAY: &str = "[B";
const THROWABLE: &str = "java/lang/Throwable";
const EOF_EXCEPTION: &str = "java/io/EOFException";
const VEXCEPTION: &str = "io/v/v23/verror/VException";
const CALLBACK: &str = "io/v/v23/rpc/Callback";
const NATIVE_CALLBACK: &str = "io/v/impl/google/rpc/NativeCallback";
const DISPATCHER: &str = "io/v/v23/rpc/Dispatcher";
const SERVICE_OBJECT: &str = "io/v/v23/rpc/ServiceObjectWithAuthorizer";
const INVOKER: &str = "io/v/v23/rpc/Invoker";
const SERVER_CALL: &str = "io/v/impl/google/rpc/ServerCallImpl";
const AUTHORIZER: &str = "io/v/v23/security/Authorizer";
const SCAN_HANDLER: &str = "io/v/v23/discovery/ScanHandler";

pub struct JavaClasses {
    pub string: GlobalRef,
    pub byte_array: GlobalRef,
    pub throwable_get_message: JMethodID,
    pub eof_exception: GlobalRef,
    pub vexception: GlobalRef,
    pub vexception_ctor: JMethodID,
    pub vexception_get_id: JMethodID,
    pub callback_on_success: JMethodID,
    pub callback_on_failure: JMethodID,
    pub native_callback: GlobalRef,
    pub native_callback_ctor: JMethodID,
    pub dispatcher_lookup: JMethodID,
    pub service_object_get_invoker: JMethodID,
    pub service_object_get_authorizer: JMethodID,
    pub invoker_prepare: JMethodID,
    pub invoker_invoke: JMethodID,
    pub invoker_get_signature: JMethodID,
    pub server_call: GlobalRef,
    pub server_call_ctor: JMethodID,
    pub authorizer_authorize: JMethodID,
    pub scan_handler_on_discovered: JMethodID,
}

fn class(env: &mut JNIEnv, name: &str) -> Result<GlobalRef> {
    let class = match env.find_class(name) {
        Ok(class) => class,
        Err(_) => {
            let _ = env.exception_clear();
            return Err(Error::MissingClass(name.to_string()));
        }
    };
    Ok(env.new_global_ref(class)?)
}

fn method(env: &mut JNIEnv, class: &GlobalRef, class_name: &str, name: &str, sig: &str) -> Result<JMethodID> {
    match env.get_method_id(<&JClass>::from(class.as_obj()), name, sig) {
        Ok(id) => Ok(id),
        Err(_) => {
            let _ = env.exception_clear();
            Err(Error::MissingMethod {
                class: class_name.to_string(),
                name: name.to_string(),
                sig: sig.to_string(),
            })
        }
    }
}

impl JavaClasses {
    pub fn resolve(env: &mut JNIEnv) -> Result<Self> {
        let string = class(env, STRING)?;
        let byte_array = class(env, BYTE_ARRAY)?;

        let throwable = class(env, THROWABLE)?;
        let throwable_get_message = method(
            env,
            &throwable,
            THROWABLE,
            "getMessage",
            "()Ljava/lang/String;",
        )?;
        let eof_exception = class(env, EOF_EXCEPTION)?;

        let vexception = class(env, VEXCEPTION)?;
        let vexception_ctor = method(
            env,
            &vexception,
            VEXCEPTION,
            "<init>",
            "(Ljava/lang/String;Ljava/lang/String;)V",
        )?;
        let vexception_get_id = method(env, &vexception, VEXCEPTION, "getID", "()Ljava/lang/String;")?;

        let callback = class(env, CALLBACK)?;
        let callback_on_success =
            method(env, &callback, CALLBACK, "onSuccess", "(Ljava/lang/Object;)V")?;
        let callback_on_failure = method(
            env,
            &callback,
            CALLBACK,
            "onFailure",
            "(Lio/v/v23/verror/VException;)V",
        )?;

        let native_callback = class(env, NATIVE_CALLBACK)?;
        let native_callback_ctor = method(env, &native_callback, NATIVE_CALLBACK, "<init>", "(J)V")?;

        let dispatcher = class(env, DISPATCHER)?;
        let dispatcher_lookup = method(
            env,
            &dispatcher,
            DISPATCHER,
            "lookup",
            "(Ljava/lang/String;)Lio/v/v23/rpc/ServiceObjectWithAuthorizer;",
        )?;

        let service_object = class(env, SERVICE_OBJECT)?;
        let service_object_get_invoker = method(
            env,
            &service_object,
            SERVICE_OBJECT,
            "getInvoker",
            "()Lio/v/v23/rpc/Invoker;",
        )?;
        let service_object_get_authorizer = method(
            env,
            &service_object,
            SERVICE_OBJECT,
            "getAuthorizer",
            "()Lio/v/v23/security/Authorizer;",
        )?;

        let invoker = class(env, INVOKER)?;
        let invoker_prepare = method(
            env,
            &invoker,
            INVOKER,
            "prepare",
            "(Ljava/lang/String;I)[Ljava/lang/String;",
        )?;
        let invoker_invoke = method(
            env,
            &invoker,
            INVOKER,
            "invoke",
            "(Lio/v/impl/google/rpc/ServerCallImpl;Ljava/lang/String;[[BLio/v/v23/rpc/Callback;)V",
        )?;
        let invoker_get_signature =
            method(env, &invoker, INVOKER, "getSignature", "()Ljava/lang/String;")?;

        let server_call = class(env, SERVER_CALL)?;
        let server_call_ctor = method(
            env,
            &server_call,
            SERVER_CALL,
            "<init>",
            "(JLjava/lang/String;)V",
        )?;

        let authorizer = class(env, AUTHORIZER)?;
        let authorizer_authorize = method(
            env,
            &authorizer,
            AUTHORIZER,
            "authorize",
            "(Ljava/lang/String;)V",
        )?;

        let scan_handler = class(env, SCAN_HANDLER)?;
        let scan_handler_on_discovered = method(
            env,
            &scan_handler,
            SCAN_HANDLER,
            "onDiscovered",
            "(Ljava/lang/String;)V",
        )?;

        debug!("java class cache resolved");
        Ok(JavaClasses {
            string,
            byte_array,
            throwable_get_message,
            eof_exception,
            vexception,
            vexception_ctor,
            vexception_get_id,
            callback_on_success,
            callback_on_failure,
            native_callback,
            native_callback_ctor,
            dispatcher_lookup,
            service_object_get_invoker,
            service_object_get_authorizer,
            invoker_prepare,
            invoker_invoke,
            invoker_get_signature,
            server_call,
            server_call_ctor,
            authorizer_authorize,
            scan_handler_on_discovered,
        })
    }
}
