//! JNI bridge
//!
//! Exposes the bridge to the `io.v` Java packages.
//!
//! ## Architecture
//!
//! - `types`: process-wide state (JavaVM, class cache, bridge) in `InitCell`s
//! - `cache`: classes and method ids resolved once in `JNI_OnLoad`
//! - `convert`: argument conversion and exception mapping
//! - `lifecycle`: `JNI_OnLoad`, init and shutdown
//! - `context`, `client`, `server`, `namespace`, `iterator`: outbound natives
//! - `callbacks`: Java callbacks for native completions and `NativeCallback`
//! - `inbound`: Java dispatchers, invokers, authorizers and scan handlers
//!
//! ## Handles
//!
//! Every native value Java holds is a `long` handle into the bridge's
//! registry. The Java wrapper owns it and must call its `nativeDispose`.
//!
//! ## Thread Model
//!
//! - Outbound natives run on the calling Java thread and may block it
//! - Forwarding tasks run on tokio workers, which attach as daemons
//! - Inbound adapters attach the runtime thread for the duration of a call

pub mod cache;
pub mod callbacks;
pub mod client;
pub mod context;
pub mod convert;
pub mod inbound;
pub mod iterator;
pub mod lifecycle;
pub mod namespace;
pub mod server;
pub mod types;

pub use inbound::{JavaAuthorizer, JavaDispatcher, JavaInvoker, JavaScanHandler};
pub use lifecycle::JNI_OnLoad;
pub use types::{bridge, install_runtime, RuntimeFactory};
