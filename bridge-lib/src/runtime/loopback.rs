//! In-process runtime.
//!
//! Servers get `@loopback/N` endpoints, names resolve against an in-memory
//! mount table by longest mounted prefix, and calls run the invoker on the
//! tokio blocking pool with a bidirectional stream to the client.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use rand::Rng;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::{broadcast, mpsc, oneshot};

use super::{
    Advertisement, Client, ClientCall, Discovery, GlobReply, ListenSpec, MountEntry, Namespace,
    Runtime, Server, ServerState, ServerStatus, Update, SIGNATURE_METHOD,
};
use crate::context::Context;
use crate::error::{ids, Error, Result, VError};
use crate::interfaces::{CallInfo, Dispatcher, ServerCall};
use crate::mutex_lock;
use crate::types::{LoopbackConfig, Payload};

const ENDPOINT_PREFIX: &str = "@loopback/";
const CLIENT_ENDPOINT: &str = "@loopback/client";
const UPDATE_BACKLOG: usize = 64;

type Mounts = HashMap<String, Option<Instant>>;

struct Shared {
    handle: RuntimeHandle,
    channel_size: usize,
    next_endpoint: AtomicU64,
    endpoints: DashMap<String, Arc<dyn Dispatcher>>,
    mounts: DashMap<String, Mounts>,
    ads: DashMap<String, Advertisement>,
    updates: broadcast::Sender<Update>,
    // Canceled by shutdown; ends advertisement and scan tasks.
    lifetime: Context,
}

fn split_name(name: &str) -> Vec<&str> {
    name.split('/').filter(|s| !s.is_empty()).collect()
}

fn canonical(name: &str) -> String {
    split_name(name).join("/")
}

fn live_servers(servers: &Mounts, now: Instant) -> Vec<String> {
    let mut live: Vec<String> = servers
        .iter()
        .filter(|(_, expiry)| expiry.map_or(true, |e| e > now))
        .map(|(server, _)| server.clone())
        .collect();
    live.sort();
    live
}

fn check(ctx: &Context) -> Result<()> {
    match ctx.err() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

impl Shared {
    fn new_endpoint(&self) -> String {
        format!(
            "{}{}",
            ENDPOINT_PREFIX,
            self.next_endpoint.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn add_mount(&self, name: &str, server: &str, ttl: Duration) {
        let expiry = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.mounts
            .entry(canonical(name))
            .or_default()
            .insert(server.to_string(), expiry);
    }

    fn remove_mount(&self, name: &str, server: &str) -> bool {
        let name = canonical(name);
        let removed = match self.mounts.get_mut(&name) {
            Some(mut servers) if server.is_empty() => {
                servers.clear();
                true
            }
            Some(mut servers) => servers.remove(server).is_some(),
            None => false,
        };
        self.mounts.remove_if(&name, |_, servers| servers.is_empty());
        removed
    }

    fn resolve(&self, name: &str) -> Result<MountEntry> {
        let name = name.trim_start_matches('/');
        if let Some(rest) = name.strip_prefix(ENDPOINT_PREFIX) {
            let (id, suffix) = rest.split_once('/').unwrap_or((rest, ""));
            return Ok(MountEntry {
                name: canonical(suffix),
                servers: vec![format!("{}{}", ENDPOINT_PREFIX, id)],
            });
        }
        let parts = split_name(name);
        let now = Instant::now();
        for i in (1..=parts.len()).rev() {
            let prefix = parts[..i].join("/");
            let servers = match self.mounts.get(&prefix) {
                Some(servers) => live_servers(&servers, now),
                None => continue,
            };
            if !servers.is_empty() {
                return Ok(MountEntry {
                    name: parts[i..].join("/"),
                    servers,
                });
            }
        }
        Err(VError::no_exist(format!("name {:?} does not resolve", name)).into())
    }

    fn dispatcher(&self, servers: &[String]) -> Result<(String, Arc<dyn Dispatcher>)> {
        servers
            .iter()
            .find_map(|server| {
                self.endpoints
                    .get(server)
                    .map(|d| (server.clone(), Arc::clone(d.value())))
            })
            .ok_or_else(|| {
                VError::no_exist(format!("no server listening at {:?}", servers)).into()
            })
    }

    /// Every mounted name and every interior name above it, with the live
    /// servers of each.
    fn names(&self) -> BTreeMap<String, Vec<String>> {
        let now = Instant::now();
        let mut names = BTreeMap::new();
        for entry in self.mounts.iter() {
            let servers = live_servers(entry.value(), now);
            if servers.is_empty() {
                continue;
            }
            let parts = split_name(entry.key());
            for i in 1..parts.len() {
                names.entry(parts[..i].join("/")).or_insert_with(Vec::new);
            }
            names.insert(entry.key().clone(), servers);
        }
        names
    }
}

fn glob_match(pattern: &[&str], name: &[&str]) -> bool {
    match (pattern.first(), name.first()) {
        (Some(&"..."), _) => true,
        (None, None) => true,
        (Some(p), Some(n)) => component_match(p, n) && glob_match(&pattern[1..], &name[1..]),
        _ => false,
    }
}

/// `*` matches any run of characters within one name component.
fn component_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

pub struct LoopbackRuntime {
    shared: Arc<Shared>,
}

impl LoopbackRuntime {
    pub fn new(handle: RuntimeHandle, config: &LoopbackConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        LoopbackRuntime {
            shared: Arc::new(Shared {
                handle,
                channel_size: config.channel_size.max(1),
                next_endpoint: AtomicU64::new(1),
                endpoints: DashMap::new(),
                mounts: DashMap::new(),
                ads: DashMap::new(),
                updates,
                lifetime: Context::background().with_cancel(),
            }),
        }
    }
}

impl Runtime for LoopbackRuntime {
    fn new_client(&self) -> Result<Arc<dyn Client>> {
        Ok(Arc::new(LoopbackClient {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    fn new_server(&self, ctx: &Context) -> Result<Arc<dyn Server>> {
        check(ctx)?;
        Ok(Arc::new(LoopbackServer {
            shared: Arc::clone(&self.shared),
            inner: Mutex::new(ServerInner {
                state: ServerState::Active,
                endpoints: Vec::new(),
                dispatcher: None,
                mounts: Vec::new(),
            }),
        }))
    }

    fn namespace(&self) -> Arc<dyn Namespace> {
        Arc::new(LoopbackNamespace {
            shared: Arc::clone(&self.shared),
        })
    }

    fn discovery(&self) -> Arc<dyn Discovery> {
        Arc::new(LoopbackDiscovery {
            shared: Arc::clone(&self.shared),
        })
    }

    fn shutdown(&self) {
        self.shared.endpoints.clear();
        self.shared.mounts.clear();
        self.shared.lifetime.cancel();
        let ids: Vec<String> = self.shared.ads.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, ad)) = self.shared.ads.remove(&id) {
                let _ = self.shared.updates.send(Update::Lost(ad));
            }
        }
        info!("loopback runtime shut down");
    }
}

struct LoopbackClient {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl Client for LoopbackClient {
    fn start_call(
        &self,
        ctx: &Context,
        name: &str,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Arc<dyn ClientCall>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VError::bad_state("client is closed").into());
        }
        check(ctx)?;
        let entry = self.shared.resolve(name)?;
        let (endpoint, dispatcher) = self.shared.dispatcher(&entry.servers)?;
        let lookup = dispatcher.lookup(&entry.name)?.ok_or_else(|| {
            Error::from(VError::no_exist(format!("nothing is served at {:?}", name)))
        })?;
        let signature = method == SIGNATURE_METHOD;
        let method_tags = if signature {
            if !args.is_empty() {
                let message = format!("{} takes no arguments", method);
                return Err(VError::new(ids::BAD_ARG, message).into());
            }
            Vec::new()
        } else {
            lookup.invoker.prepare(method, args.len())?.tags
        };
        let info = CallInfo {
            suffix: entry.name,
            method: method.to_string(),
            method_tags,
            local_endpoint: endpoint,
            remote_endpoint: CLIENT_ENDPOINT.to_string(),
        };
        if let Some(authorizer) = &lookup.authorizer {
            authorizer.authorize(&info).map_err(|err| {
                VError::no_access(format!("{}.{} denied: {}", name, method, err))
            })?;
        }
        debug!("loopback call {}.{} -> {}", name, method, info.local_endpoint);

        let (to_server, server_in) = mpsc::channel(self.shared.channel_size);
        let (server_out, from_server) = mpsc::channel(self.shared.channel_size);
        let (done_tx, done_rx) = oneshot::channel();
        let server_call: Arc<dyn ServerCall> = Arc::new(LoopbackServerCall {
            info,
            incoming: Mutex::new(server_in),
            outgoing: server_out,
        });
        let invoker = lookup.invoker;
        let method = method.to_string();
        self.shared.handle.spawn_blocking(move || {
            let result = if signature {
                invoker
                    .signature()
                    .and_then(|sig| Ok(vec![serde_json::to_vec(&sig)?]))
            } else {
                invoker.invoke(server_call, &method, args)
            };
            if let Err(err) = &result {
                debug!("loopback method {} failed: {}", method, err);
            }
            let _ = done_tx.send(result);
        });

        Ok(Arc::new(LoopbackClientCall {
            ctx: ctx.clone(),
            handle: self.shared.handle.clone(),
            outgoing: Mutex::new(Some(to_server)),
            incoming: Mutex::new(from_server),
            done: Mutex::new(Some(done_rx)),
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct LoopbackClientCall {
    ctx: Context,
    handle: RuntimeHandle,
    outgoing: Mutex<Option<mpsc::Sender<Payload>>>,
    incoming: Mutex<mpsc::Receiver<Payload>>,
    done: Mutex<Option<oneshot::Receiver<Result<Vec<Payload>>>>>,
}

impl LoopbackClientCall {
    /// Blocks on `fut`, giving up when the call's context is done.
    fn wait<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let ctx = self.ctx.clone();
        self.handle.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = ctx.done() => Err(ctx.err().unwrap_or_else(VError::canceled).into()),
            }
        })
    }
}

impl ClientCall for LoopbackClientCall {
    fn send(&self, item: Payload) -> Result<()> {
        let sender = mutex_lock!(self.outgoing)
            .clone()
            .ok_or_else(|| Error::from(VError::bad_state("send after close_send")))?;
        self.wait(async move {
            sender
                .send(item)
                .await
                .map_err(|_| VError::bad_state("server stopped receiving").into())
        })
    }

    fn recv(&self) -> Result<Payload> {
        let mut incoming = mutex_lock!(self.incoming);
        self.wait(async { incoming.recv().await.ok_or(Error::EndOfStream) })
    }

    fn close_send(&self) -> Result<()> {
        mutex_lock!(self.outgoing).take();
        Ok(())
    }

    fn finish(&self) -> Result<Vec<Payload>> {
        self.close_send()?;
        mutex_lock!(self.incoming).close();
        let done = mutex_lock!(self.done)
            .take()
            .ok_or_else(|| Error::from(VError::bad_state("finish already called")))?;
        self.wait(async move {
            done.await.unwrap_or_else(|_| {
                Err(VError::new(ids::INTERNAL, "server dropped the call").into())
            })
        })
    }
}

struct LoopbackServerCall {
    info: CallInfo,
    incoming: Mutex<mpsc::Receiver<Payload>>,
    outgoing: mpsc::Sender<Payload>,
}

impl ServerCall for LoopbackServerCall {
    fn info(&self) -> &CallInfo {
        &self.info
    }

    fn send(&self, item: Payload) -> Result<()> {
        self.outgoing
            .blocking_send(item)
            .map_err(|_| VError::bad_state("client stopped receiving").into())
    }

    fn recv(&self) -> Result<Payload> {
        mutex_lock!(self.incoming)
            .blocking_recv()
            .ok_or(Error::EndOfStream)
    }
}

struct ServerInner {
    state: ServerState,
    endpoints: Vec<String>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    mounts: Vec<String>,
}

struct LoopbackServer {
    shared: Arc<Shared>,
    inner: Mutex<ServerInner>,
}

impl Server for LoopbackServer {
    fn listen(&self, spec: &ListenSpec) -> Result<Vec<String>> {
        let mut inner = mutex_lock!(self.inner);
        if inner.state != ServerState::Active {
            return Err(VError::bad_state("server is stopped").into());
        }
        let added: Vec<String> = (0..spec.addrs.len().max(1))
            .map(|_| self.shared.new_endpoint())
            .collect();
        if let Some(dispatcher) = &inner.dispatcher {
            for endpoint in &added {
                self.shared
                    .endpoints
                    .insert(endpoint.clone(), Arc::clone(dispatcher));
                for name in &inner.mounts {
                    self.shared.add_mount(name, endpoint, Duration::ZERO);
                }
            }
        }
        inner.endpoints.extend(added);
        Ok(inner.endpoints.clone())
    }

    fn serve(&self, name: &str, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
        if mutex_lock!(self.inner).endpoints.is_empty() {
            self.listen(&ListenSpec::default())?;
        }
        let mut inner = mutex_lock!(self.inner);
        if inner.state != ServerState::Active {
            return Err(VError::bad_state("server is stopped").into());
        }
        if inner.dispatcher.is_some() {
            return Err(VError::bad_state("server is already serving").into());
        }
        for endpoint in &inner.endpoints {
            self.shared
                .endpoints
                .insert(endpoint.clone(), Arc::clone(&dispatcher));
        }
        let name = canonical(name);
        if !name.is_empty() {
            for endpoint in &inner.endpoints {
                self.shared.add_mount(&name, endpoint, Duration::ZERO);
            }
            inner.mounts.push(name.clone());
        }
        inner.dispatcher = Some(dispatcher);
        info!("serving {:?} at {:?}", name, inner.endpoints);
        Ok(())
    }

    fn status(&self) -> ServerStatus {
        let inner = mutex_lock!(self.inner);
        ServerStatus {
            state: inner.state,
            endpoints: inner.endpoints.clone(),
            mounts: inner.mounts.clone(),
        }
    }

    fn stop(&self) -> Result<()> {
        let mut inner = mutex_lock!(self.inner);
        if inner.state == ServerState::Stopped {
            return Ok(());
        }
        inner.state = ServerState::Stopping;
        for endpoint in &inner.endpoints {
            self.shared.endpoints.remove(endpoint);
            for name in &inner.mounts {
                self.shared.remove_mount(name, endpoint);
            }
        }
        inner.dispatcher = None;
        inner.state = ServerState::Stopped;
        info!("stopped server at {:?}", inner.endpoints);
        Ok(())
    }
}

struct LoopbackNamespace {
    shared: Arc<Shared>,
}

impl Namespace for LoopbackNamespace {
    fn glob(&self, ctx: &Context, pattern: &str) -> Result<mpsc::Receiver<GlobReply>> {
        check(ctx)?;
        let pattern = split_name(pattern);
        if pattern.is_empty() {
            return Err(VError::new(ids::BAD_ARG, "empty glob pattern").into());
        }
        let matches: Vec<MountEntry> = self
            .shared
            .names()
            .into_iter()
            .filter(|(name, _)| glob_match(&pattern, &split_name(name)))
            .map(|(name, servers)| MountEntry { name, servers })
            .collect();
        let (tx, rx) = mpsc::channel(self.shared.channel_size);
        let ctx = ctx.clone();
        self.shared.handle.spawn(async move {
            for entry in matches {
                tokio::select! {
                    _ = ctx.done() => {
                        debug!("glob canceled");
                        return;
                    }
                    sent = tx.send(GlobReply::Entry(entry)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    fn mount(&self, ctx: &Context, name: &str, server: &str, ttl: Duration) -> Result<()> {
        check(ctx)?;
        if canonical(name).is_empty() || server.is_empty() {
            return Err(VError::new(ids::BAD_ARG, "mount needs a name and a server").into());
        }
        self.shared.add_mount(name, server, ttl);
        debug!("mounted {} at {}", server, name);
        Ok(())
    }

    fn unmount(&self, ctx: &Context, name: &str, server: &str) -> Result<()> {
        check(ctx)?;
        if self.shared.remove_mount(name, server) {
            Ok(())
        } else {
            Err(VError::no_exist(format!("{:?} is not mounted at {:?}", server, name)).into())
        }
    }

    fn resolve(&self, ctx: &Context, name: &str) -> Result<MountEntry> {
        check(ctx)?;
        self.shared.resolve(name)
    }
}

struct LoopbackDiscovery {
    shared: Arc<Shared>,
}

fn random_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn matches_query(query: &str, ad: &Advertisement) -> bool {
    query.is_empty() || ad.interface_name == query
}

impl Discovery for LoopbackDiscovery {
    fn advertise(&self, ctx: &Context, mut ad: Advertisement) -> Result<String> {
        check(ctx)?;
        if self.shared.lifetime.is_canceled() {
            return Err(VError::bad_state("runtime is shut down").into());
        }
        if ad.interface_name.is_empty() {
            return Err(VError::new(ids::BAD_ARG, "advertisement has no interface name").into());
        }
        if ad.id.is_empty() {
            ad.id = random_id();
        } else if self.shared.ads.contains_key(&ad.id) {
            return Err(VError::bad_state(format!("{} is already advertised", ad.id)).into());
        }
        let id = ad.id.clone();
        self.shared.ads.insert(id.clone(), ad.clone());
        let _ = self.shared.updates.send(Update::Found(ad));
        debug!("advertising {}", id);

        let shared = Arc::clone(&self.shared);
        let ctx = ctx.clone();
        let ad_id = id.clone();
        self.shared.handle.spawn(async move {
            tokio::select! {
                _ = ctx.done() => {}
                _ = shared.lifetime.done() => return,
            }
            if let Some((_, ad)) = shared.ads.remove(&ad_id) {
                debug!("advertisement {} withdrawn", ad_id);
                let _ = shared.updates.send(Update::Lost(ad));
            }
        });
        Ok(id)
    }

    fn scan(&self, ctx: &Context, query: &str) -> Result<mpsc::Receiver<Update>> {
        check(ctx)?;
        let mut updates = self.shared.updates.subscribe();
        let query = query.to_string();
        let existing: Vec<Advertisement> = self
            .shared
            .ads
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|ad| matches_query(&query, ad))
            .collect();
        let (tx, rx) = mpsc::channel(self.shared.channel_size);
        let ctx = ctx.clone();
        self.shared.handle.spawn(async move {
            let mut seen = HashSet::new();
            let mut pending: Vec<Update> = existing.into_iter().map(Update::Found).collect();
            pending.reverse();
            loop {
                let update = match pending.pop() {
                    Some(update) => update,
                    None => {
                        let received = tokio::select! {
                            _ = ctx.done() => return,
                            received = updates.recv() => received,
                        };
                        match received {
                            Ok(update) => update,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!("scan fell behind, {} updates dropped", missed);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => return,
                        }
                    }
                };
                if !matches_query(&query, update.advertisement()) {
                    continue;
                }
                let fresh = match &update {
                    Update::Found(ad) => seen.insert(ad.id.clone()),
                    Update::Lost(ad) => seen.remove(&ad.id),
                };
                if !fresh {
                    continue;
                }
                tokio::select! {
                    _ = ctx.done() => return,
                    sent = tx.send(update) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }
}
