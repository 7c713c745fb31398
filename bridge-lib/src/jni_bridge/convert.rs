//! Conversions between Java and native values, and error mapping in both
//! directions.

use jni::errors::Error as JniError;
use jni::objects::{GlobalRef, JByteArray, JClass, JObject, JObjectArray, JString, JThrowable, JValue};
use jni::signature::ReturnType;
use jni::JNIEnv;
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cache::JavaClasses;
use super::types::{CLASSES, JAVA_VM};
use crate::error::{ids, Error, Exception, Result, VError};
use crate::types::Payload;

/// Runs an entry point body, throwing its error into Java and returning
/// `fallback` in that case.
pub(crate) fn guard<'local, T, F>(env: &mut JNIEnv<'local>, fallback: T, body: F) -> T
where
    F: FnOnce(&mut JNIEnv<'local>) -> Result<T>,
{
    match body(env) {
        Ok(value) => value,
        Err(err) => {
            throw(env, &err);
            fallback
        }
    }
}

pub(crate) fn throw(env: &mut JNIEnv, err: &Error) {
    // A Java exception raised underneath us is already pending.
    if env.exception_check().unwrap_or(false) {
        return;
    }
    let thrown = match err.exception() {
        Exception::VException { id, message } => {
            new_vexception(env, &VError::new(id, message))
                .and_then(|e| Ok(env.throw(JThrowable::from(e))?))
        }
        Exception::EndOfStream => CLASSES.get().and_then(|classes| {
            Ok(env.throw_new(<&JClass>::from(classes.eof_exception.as_obj()), "end of stream")?)
        }),
        Exception::Generic(message) => env
            .throw_new(exception_class(err), message)
            .map_err(Error::from),
    };
    if let Err(e) = thrown {
        error!("failed to throw {}: {}", err, e);
    }
}

/// The Java exception class `err` is thrown as.
pub(crate) fn exception_class(err: &Error) -> &'static str {
    match err {
        Error::Native(_) => "io/v/v23/verror/VException",
        Error::EndOfStream => "java/io/EOFException",
        Error::NotInitialized(_) | Error::AlreadyInitialized(_) => {
            "java/lang/IllegalStateException"
        }
        Error::InvalidArgument(_) => "java/lang/IllegalArgumentException",
        _ => "java/lang/RuntimeException",
    }
}

pub(crate) fn new_vexception<'local>(env: &mut JNIEnv<'local>, err: &VError) -> Result<JObject<'local>> {
    let classes = CLASSES.get()?;
    let id = env.new_string(&err.id)?;
    let message = env.new_string(&err.message)?;
    let exception = unsafe {
        env.new_object_unchecked(
            <&JClass>::from(classes.vexception.as_obj()),
            classes.vexception_ctor,
            &[JValue::Object(&id).as_jni(), JValue::Object(&message).as_jni()],
        )
    }?;
    Ok(exception)
}

/// Converts a thrown Java exception into a native error. A VException keeps
/// its id; anything else becomes `Unknown`.
pub(crate) fn verror_from_throwable(env: &mut JNIEnv, throwable: &JObject) -> Result<VError> {
    non_null(throwable, "error")?;
    let classes = CLASSES.get()?;
    let message = unsafe {
        env.call_method_unchecked(throwable, classes.throwable_get_message, ReturnType::Object, &[])
    }?
    .l()?;
    let message = read_nullable_string(env, &JString::from(message))?;
    let id = if env.is_instance_of(throwable, <&JClass>::from(classes.vexception.as_obj()))? {
        let id = unsafe {
            env.call_method_unchecked(throwable, classes.vexception_get_id, ReturnType::Object, &[])
        }?
        .l()?;
        read_nullable_string(env, &JString::from(id))?
    } else {
        String::new()
    };
    let id = if id.is_empty() { ids::UNKNOWN.to_string() } else { id };
    Ok(VError::new(id, message))
}

/// Rejects a null object argument before it reaches a JNI call.
pub(crate) fn non_null(obj: &JObject, what: &str) -> Result<()> {
    if obj.is_null() {
        return Err(Error::invalid_argument(format!("null {}", what)));
    }
    Ok(())
}

/// Takes the pending Java exception, if any, clearing it.
pub(crate) fn take_exception(env: &mut JNIEnv) -> Option<VError> {
    if !env.exception_check().unwrap_or(false) {
        return None;
    }
    let throwable = env.exception_occurred();
    let _ = env.exception_clear();
    let converted = match throwable {
        Ok(throwable) => verror_from_throwable(env, &throwable),
        Err(e) => Err(e.into()),
    };
    Some(converted.unwrap_or_else(|e| {
        warn!("could not inspect java exception: {}", e);
        let _ = env.exception_clear();
        VError::unknown("java exception")
    }))
}

/// Runs a call into Java, turning a thrown exception into a native error.
pub(crate) fn call_java<'local, T, F>(env: &mut JNIEnv<'local>, call: F) -> Result<T>
where
    F: FnOnce(&mut JNIEnv<'local>) -> jni::errors::Result<T>,
{
    match call(env) {
        Ok(value) => Ok(value),
        Err(JniError::JavaException) => Err(take_exception(env)
            .unwrap_or_else(|| VError::unknown("java exception"))
            .into()),
        Err(e) => Err(e.into()),
    }
}

/// Attaches the current thread and runs `f` inside a local reference frame.
pub(crate) fn with_env<T, F>(f: F) -> Result<T>
where
    F: for<'a> FnOnce(&mut JNIEnv<'a>, &'static JavaClasses) -> Result<T>,
{
    let vm = JAVA_VM.get()?;
    let classes = CLASSES.get()?;
    let mut env = vm.attach_current_thread()?;
    env.with_local_frame(16, |env| f(env, classes))
}

pub(crate) fn read_string(env: &mut JNIEnv, s: &JString) -> Result<String> {
    if s.is_null() {
        return Err(Error::invalid_argument("null string"));
    }
    Ok(env.get_string(s)?.into())
}

pub(crate) fn read_nullable_string(env: &mut JNIEnv, s: &JString) -> Result<String> {
    if s.is_null() {
        Ok(String::new())
    } else {
        read_string(env, s)
    }
}

pub(crate) fn read_bytes(env: &mut JNIEnv, bytes: &JByteArray) -> Result<Payload> {
    if bytes.is_null() {
        return Err(Error::invalid_argument("null byte array"));
    }
    Ok(env.convert_byte_array(bytes)?)
}

/// A null array reads as empty.
pub(crate) fn read_byte_arrays(env: &mut JNIEnv, arrays: &JObjectArray) -> Result<Vec<Payload>> {
    if arrays.is_null() {
        return Ok(Vec::new());
    }
    let len = env.get_array_length(arrays)?;
    let mut out = Vec::with_capacity(len as usize);
    for i in 0..len {
        let element = JByteArray::from(env.get_object_array_element(arrays, i)?);
        out.push(read_bytes(env, &element)?);
        env.delete_local_ref(element)?;
    }
    Ok(out)
}

pub(crate) fn read_string_array(env: &mut JNIEnv, strings: &JObjectArray) -> Result<Vec<String>> {
    if strings.is_null() {
        return Ok(Vec::new());
    }
    let len = env.get_array_length(strings)?;
    let mut out = Vec::with_capacity(len as usize);
    for i in 0..len {
        let element = JString::from(env.get_object_array_element(strings, i)?);
        out.push(read_string(env, &element)?);
        env.delete_local_ref(element)?;
    }
    Ok(out)
}

pub(crate) fn new_byte_arrays<'local>(
    env: &mut JNIEnv<'local>,
    items: &[Payload],
) -> Result<JObjectArray<'local>> {
    let classes = CLASSES.get()?;
    let array = env.new_object_array(
        items.len() as i32,
        <&JClass>::from(classes.byte_array.as_obj()),
        JObject::null(),
    )?;
    for (i, item) in items.iter().enumerate() {
        let element = env.byte_array_from_slice(item)?;
        env.set_object_array_element(&array, i as i32, &element)?;
        env.delete_local_ref(element)?;
    }
    Ok(array)
}

pub(crate) fn new_string_array<'local>(
    env: &mut JNIEnv<'local>,
    items: &[String],
) -> Result<JObjectArray<'local>> {
    let classes = CLASSES.get()?;
    let array = env.new_object_array(
        items.len() as i32,
        <&JClass>::from(classes.string.as_obj()),
        JObject::null(),
    )?;
    for (i, item) in items.iter().enumerate() {
        let element = env.new_string(item)?;
        env.set_object_array_element(&array, i as i32, &element)?;
        env.delete_local_ref(element)?;
    }
    Ok(array)
}

pub(crate) fn to_json<'local, T: Serialize>(env: &mut JNIEnv<'local>, value: &T) -> Result<JString<'local>> {
    let json = serde_json::to_string(value)?;
    Ok(env.new_string(json)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(env: &mut JNIEnv, json: &JString) -> Result<T> {
    let json = read_string(env, json)?;
    Ok(serde_json::from_str(&json)?)
}

/// Serializes `value` into a Java string that can cross threads. Runs on
/// runtime worker threads, which stay attached.
pub(crate) fn global_json<T: Serialize>(value: &T) -> Result<GlobalRef> {
    let json = serde_json::to_string(value)?;
    let vm = JAVA_VM.get()?;
    let env = vm.attach_current_thread_as_daemon()?;
    let local = env.new_string(json)?;
    let global = env.new_global_ref(&local)?;
    env.delete_local_ref(local)?;
    Ok(global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jni_bridge::types::bridge;

    #[test]
    fn uninitialized_bridge_throws_illegal_state() {
        let err = bridge().err().unwrap();
        assert!(matches!(err, Error::NotInitialized("bridge")));
        assert_eq!(exception_class(&err), "java/lang/IllegalStateException");
        assert_eq!(
            exception_class(&Error::AlreadyInitialized("bridge")),
            "java/lang/IllegalStateException"
        );
    }

    #[test]
    fn null_objects_are_invalid_arguments() {
        let err = non_null(&JObject::null(), "callback").unwrap_err();
        assert!(matches!(&err, Error::InvalidArgument(msg) if msg == "null callback"));
        assert_eq!(exception_class(&err), "java/lang/IllegalArgumentException");
    }

    #[test]
    fn errors_map_to_java_exception_classes() {
        assert_eq!(
            exception_class(&Error::invalid_argument("null callback")),
            "java/lang/IllegalArgumentException"
        );
        assert_eq!(exception_class(&Error::EndOfStream), "java/io/EOFException");
        assert_eq!(
            exception_class(&VError::no_exist("x").into()),
            "io/v/v23/verror/VException"
        );
        assert_eq!(
            exception_class(&Error::runtime("boom")),
            "java/lang/RuntimeException"
        );
    }
}
