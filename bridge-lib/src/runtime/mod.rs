//! The native runtime as seen by the bridge.
//!
//! These traits describe the runtime services the outbound adapters call
//! through. A real deployment installs an implementation backed by the v23
//! runtime; [`loopback`] is an in-process implementation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::{Result, VError};
use crate::interfaces::Dispatcher;
use crate::types::Payload;

pub mod loopback;

pub use loopback::LoopbackRuntime;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSpec {
    pub addrs: Vec<ListenAddr>,
    pub proxy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenAddr {
    pub protocol: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub state: ServerState,
    pub endpoints: Vec<String>,
    pub mounts: Vec<String>,
}

/// Result of resolving a name: the servers it maps to and the part of the
/// name left for those servers to interpret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub name: String,
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GlobReply {
    Entry(MountEntry),
    Error { name: String, error: VError },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advertisement {
    pub id: String,
    pub interface_name: String,
    pub addresses: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "advertisement", rename_all = "snake_case")]
pub enum Update {
    Found(Advertisement),
    Lost(Advertisement),
}

impl Update {
    pub fn advertisement(&self) -> &Advertisement {
        match self {
            Update::Found(ad) | Update::Lost(ad) => ad,
        }
    }
}

pub trait Runtime: Send + Sync {
    fn new_client(&self) -> Result<Arc<dyn Client>>;
    fn new_server(&self, ctx: &Context) -> Result<Arc<dyn Server>>;
    fn namespace(&self) -> Arc<dyn Namespace>;
    fn discovery(&self) -> Arc<dyn Discovery>;
    fn shutdown(&self) {}
}

/// Reserved method answering with the served object's signature, as a
/// single JSON-encoded `Vec<Interface>` result.
pub const SIGNATURE_METHOD: &str = "__Signature";

pub trait Client: Send + Sync {
    fn start_call(
        &self,
        ctx: &Context,
        name: &str,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Arc<dyn ClientCall>>;
    fn close(&self);
}

/// The client side of an in-flight call, including its bidirectional stream.
pub trait ClientCall: Send + Sync {
    fn send(&self, item: Payload) -> Result<()>;
    /// Next streamed item; `Error::EndOfStream` once the server stops sending.
    fn recv(&self) -> Result<Payload>;
    fn close_send(&self) -> Result<()>;
    /// Waits for the call's results. Closes the send side first.
    fn finish(&self) -> Result<Vec<Payload>>;
}

pub trait Server: Send + Sync {
    fn listen(&self, spec: &ListenSpec) -> Result<Vec<String>>;
    fn serve(&self, name: &str, dispatcher: Arc<dyn Dispatcher>) -> Result<()>;
    fn status(&self) -> ServerStatus;
    fn stop(&self) -> Result<()>;
}

pub trait Namespace: Send + Sync {
    fn glob(&self, ctx: &Context, pattern: &str) -> Result<mpsc::Receiver<GlobReply>>;
    /// A zero `ttl` keeps the mount until it is removed.
    fn mount(&self, ctx: &Context, name: &str, server: &str, ttl: Duration) -> Result<()>;
    /// An empty `server` removes every server mounted at `name`.
    fn unmount(&self, ctx: &Context, name: &str, server: &str) -> Result<()>;
    fn resolve(&self, ctx: &Context, name: &str) -> Result<MountEntry>;
}

pub trait Discovery: Send + Sync {
    /// Advertises until `ctx` is done; returns the advertisement id.
    fn advertise(&self, ctx: &Context, ad: Advertisement) -> Result<String>;
    /// Streams updates for advertisements whose interface matches `query`
    /// (empty matches all) until `ctx` is done.
    fn scan(&self, ctx: &Context, query: &str) -> Result<mpsc::Receiver<Update>>;
}
