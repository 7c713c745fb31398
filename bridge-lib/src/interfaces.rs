//! Interfaces the native runtime calls into.
//!
//! Implementations may live on either side of the bridge: native closures
//! (see [`MethodInvoker`], [`LeafDispatcher`]) or Java objects wrapped by the
//! JNI layer. The runtime may call any of them from any thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VError};
use crate::runtime::Update;
use crate::types::Payload;

/// What a server knows about an incoming call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub suffix: String,
    pub method: String,
    pub method_tags: Vec<String>,
    pub local_endpoint: String,
    pub remote_endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub num_in_args: usize,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub pkg_path: String,
    pub doc: String,
    pub methods: Vec<MethodSig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub doc: String,
    pub in_args: Vec<String>,
    pub out_args: Vec<String>,
    pub tags: Vec<String>,
}

/// The server side of one in-flight call.
pub trait ServerCall: Send + Sync {
    fn info(&self) -> &CallInfo;
    fn send(&self, item: Payload) -> Result<()>;
    /// Next item sent by the client; `Error::EndOfStream` once it closes its side.
    fn recv(&self) -> Result<Payload>;
}

pub trait Invoker: Send + Sync {
    fn prepare(&self, method: &str, num_args: usize) -> Result<MethodInfo>;
    fn invoke(
        &self,
        call: Arc<dyn ServerCall>,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Vec<Payload>>;
    fn signature(&self) -> Result<Vec<Interface>>;
}

pub trait Authorizer: Send + Sync {
    fn authorize(&self, call: &CallInfo) -> Result<()>;
}

/// The object serving a suffix, and who may call it. A missing authorizer
/// admits every caller.
#[derive(Clone)]
pub struct Lookup {
    pub invoker: Arc<dyn Invoker>,
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("authorizer", &self.authorizer.is_some())
            .finish()
    }
}

pub trait Dispatcher: Send + Sync {
    /// `Ok(None)` means nothing is served at `suffix`.
    fn lookup(&self, suffix: &str) -> Result<Option<Lookup>>;
}

pub trait ScanHandler: Send + Sync {
    fn on_discovered(&self, update: Update);
}

pub struct AllowEveryone;

impl Authorizer for AllowEveryone {
    fn authorize(&self, _call: &CallInfo) -> Result<()> {
        Ok(())
    }
}

/// Serves the same object at every suffix.
pub struct LeafDispatcher {
    lookup: Lookup,
}

impl LeafDispatcher {
    pub fn new(invoker: Arc<dyn Invoker>, authorizer: Option<Arc<dyn Authorizer>>) -> Self {
        LeafDispatcher {
            lookup: Lookup {
                invoker,
                authorizer,
            },
        }
    }
}

impl Dispatcher for LeafDispatcher {
    fn lookup(&self, _suffix: &str) -> Result<Option<Lookup>> {
        Ok(Some(self.lookup.clone()))
    }
}

type MethodFn = dyn Fn(Arc<dyn ServerCall>, Vec<Payload>) -> Result<Vec<Payload>> + Send + Sync;

struct MethodEntry {
    num_in_args: usize,
    tags: Vec<String>,
    handler: Box<MethodFn>,
}

/// An invoker built from native closures, one per method.
#[derive(Default)]
pub struct MethodInvoker {
    name: String,
    methods: HashMap<String, MethodEntry>,
}

impl MethodInvoker {
    pub fn new<N: Into<String>>(name: N) -> Self {
        MethodInvoker {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method<F>(mut self, name: &str, num_in_args: usize, tags: &[&str], handler: F) -> Self
    where
        F: Fn(Arc<dyn ServerCall>, Vec<Payload>) -> Result<Vec<Payload>> + Send + Sync + 'static,
    {
        self.methods.insert(
            name.to_string(),
            MethodEntry {
                num_in_args,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                handler: Box::new(handler),
            },
        );
        self
    }

    fn entry(&self, method: &str) -> Result<&MethodEntry> {
        self.methods.get(method).ok_or_else(|| {
            VError::no_exist(format!("{} has no method {}", self.name, method)).into()
        })
    }
}

impl Invoker for MethodInvoker {
    fn prepare(&self, method: &str, num_args: usize) -> Result<MethodInfo> {
        let entry = self.entry(method)?;
        if entry.num_in_args != num_args {
            return Err(VError::new(
                crate::error::ids::BAD_ARG,
                format!(
                    "{}.{} takes {} arguments, got {}",
                    self.name, method, entry.num_in_args, num_args
                ),
            )
            .into());
        }
        Ok(MethodInfo {
            num_in_args: entry.num_in_args,
            tags: entry.tags.clone(),
        })
    }

    fn invoke(
        &self,
        call: Arc<dyn ServerCall>,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Vec<Payload>> {
        (self.entry(method)?.handler)(call, args)
    }

    fn signature(&self) -> Result<Vec<Interface>> {
        let mut methods: Vec<MethodSig> = self
            .methods
            .iter()
            .map(|(name, entry)| MethodSig {
                name: name.clone(),
                in_args: (0..entry.num_in_args).map(|i| format!("arg{}", i)).collect(),
                tags: entry.tags.clone(),
                ..Default::default()
            })
            .collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vec![Interface {
            name: self.name.clone(),
            methods,
            ..Default::default()
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ids, Error};

    struct NullCall(CallInfo);

    impl ServerCall for NullCall {
        fn info(&self) -> &CallInfo {
            &self.0
        }
        fn send(&self, _item: Payload) -> Result<()> {
            Ok(())
        }
        fn recv(&self) -> Result<Payload> {
            Err(Error::EndOfStream)
        }
    }

    fn echo() -> MethodInvoker {
        MethodInvoker::new("Echo")
            .method("Echo", 1, &["Read"], |_, args| Ok(args))
            .method("Ping", 0, &[], |_, _| Ok(vec![b"pong".to_vec()]))
    }

    #[test]
    fn method_invoker_prepares_and_invokes() {
        let invoker = echo();
        let info = invoker.prepare("Echo", 1).unwrap();
        assert_eq!(info.tags, vec!["Read".to_string()]);

        let call: Arc<dyn ServerCall> = Arc::new(NullCall(CallInfo::default()));
        let out = invoker
            .invoke(call, "Echo", vec![b"hi".to_vec()])
            .unwrap();
        assert_eq!(out, vec![b"hi".to_vec()]);
    }

    #[test]
    fn method_invoker_rejects_unknown_methods_and_arity() {
        let invoker = echo();
        let err = invoker.prepare("Shout", 1).unwrap_err();
        assert_eq!(err.verror().unwrap().id, ids::NO_EXIST);
        let err = invoker.prepare("Echo", 3).unwrap_err();
        assert_eq!(err.verror().unwrap().id, ids::BAD_ARG);
    }

    #[test]
    fn signature_lists_methods_sorted() {
        let sig = echo().signature().unwrap();
        let names: Vec<_> = sig[0].methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Echo", "Ping"]);
        assert_eq!(sig[0].methods[0].in_args.len(), 1);
    }

    #[test]
    fn leaf_dispatcher_serves_every_suffix() {
        let dispatcher = LeafDispatcher::new(Arc::new(echo()), Some(Arc::new(AllowEveryone)));
        for suffix in ["", "a", "a/b/c"] {
            let lookup = dispatcher.lookup(suffix).unwrap().unwrap();
            assert!(lookup.authorizer.is_some());
            lookup.invoker.prepare("Ping", 0).unwrap();
        }
    }
}
