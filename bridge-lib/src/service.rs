//! Native half of every outbound adapter.
//!
//! [`Bridge`] owns the handle registry, the tokio runtime that forwarding
//! tasks and asynchronous completions run on, and the v23 runtime. Each
//! operation takes and returns [`Handle`]s, so the JNI layer only has to
//! convert arguments and map errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::runtime::{Builder, Handle as RuntimeHandle, Runtime as TokioRuntime};

use crate::callback::{spawn_completion, Callback};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handles::{Handle, HandleRegistry, Pinned};
use crate::interfaces::{CallInfo, Dispatcher, Interface, ScanHandler, ServerCall};
use crate::mutex_lock;
use crate::runtime::{
    Advertisement, Client, ClientCall, GlobReply, ListenSpec, LoopbackRuntime, MountEntry,
    Runtime, Server, ServerStatus, Update, SIGNATURE_METHOD,
};
use crate::stream::{ChannelIterator, CloseHandle};
use crate::types::{BridgeConfig, Payload};

/// How an iterator handle is pinned. Readers block on `reader` without
/// holding the pinned value, so `close` and `dispose` reach a parked reader.
pub struct PinnedIterator<T> {
    closer: CloseHandle,
    reader: Arc<Mutex<ChannelIterator<T>>>,
}

impl<T> Drop for PinnedIterator<T> {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Completion of an asynchronous call, as pinned for the embedding side.
pub type CallCallback = Callback<Vec<Payload>>;

pub struct Bridge {
    config: BridgeConfig,
    registry: Arc<HandleRegistry>,
    handle: RuntimeHandle,
    // Only taken in Drop.
    tokio: Option<TokioRuntime>,
    v23: Arc<dyn Runtime>,
}

fn build_runtime(config: &BridgeConfig) -> Result<TokioRuntime> {
    Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .thread_name(config.runtime.thread_name.clone())
        .enable_all()
        .build()
        .map_err(Error::runtime)
}

impl Bridge {
    /// Builds the tokio runtime, then the v23 runtime on top of it.
    pub fn new<F>(config: BridgeConfig, make_runtime: F) -> Result<Self>
    where
        F: FnOnce(RuntimeHandle, &BridgeConfig) -> Arc<dyn Runtime>,
    {
        config.validate()?;
        let tokio = build_runtime(&config)?;
        let handle = tokio.handle().clone();
        let v23 = make_runtime(handle.clone(), &config);
        info!(
            "bridge started with {} worker threads",
            config.runtime.worker_threads
        );
        Ok(Bridge {
            config,
            registry: Arc::new(HandleRegistry::new()),
            handle,
            tokio: Some(tokio),
            v23,
        })
    }

    pub fn with_loopback(config: BridgeConfig) -> Result<Self> {
        Self::new(config, |handle, config| {
            Arc::new(LoopbackRuntime::new(handle, &config.loopback))
        })
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Stops the v23 runtime and releases every outstanding handle.
    pub fn shutdown(&self) {
        self.v23.shutdown();
        let released = self.registry.len();
        self.registry.clear();
        info!("bridge shut down, released {} handles", released);
    }

    /// Releases any handle produced by this bridge.
    pub fn dispose(&self, handle: Handle) -> Result<()> {
        self.registry.unpin(handle)
    }

    fn context(&self, ctx: Handle) -> Result<Arc<Context>> {
        self.registry.get::<Context>(ctx)
    }

    pub fn background_context(&self) -> Handle {
        self.registry.pin(Context::background())
    }

    pub fn with_cancel(&self, ctx: Handle) -> Result<Handle> {
        let parent = self.context(ctx)?;
        Ok(self.registry.pin(parent.with_cancel()))
    }

    pub fn with_timeout(&self, ctx: Handle, timeout: Duration) -> Result<Handle> {
        let parent = self.context(ctx)?;
        Ok(self.registry.pin(parent.with_timeout(timeout)))
    }

    pub fn cancel(&self, ctx: Handle) -> Result<()> {
        self.context(ctx)?.cancel();
        Ok(())
    }

    pub fn is_canceled(&self, ctx: Handle) -> Result<bool> {
        Ok(self.context(ctx)?.is_canceled())
    }

    pub fn new_client(&self) -> Result<Handle> {
        let client = self.v23.new_client()?;
        Ok(self.registry.pin(client))
    }

    pub fn start_call(
        &self,
        client: Handle,
        ctx: Handle,
        name: &str,
        method: &str,
        args: Vec<Payload>,
    ) -> Result<Handle> {
        let client = self.registry.get::<Arc<dyn Client>>(client)?;
        let ctx = self.context(ctx)?;
        debug!("start_call {}.{} with {} args", name, method, args.len());
        let call = client.start_call(&ctx, name, method, args)?;
        Ok(self.registry.pin(call))
    }

    fn call(&self, call: Handle) -> Result<Arc<Arc<dyn ClientCall>>> {
        self.registry.get::<Arc<dyn ClientCall>>(call)
    }

    /// Asks the object served at `name` for its signature.
    pub fn signature(&self, client: Handle, ctx: Handle, name: &str) -> Result<Vec<Interface>> {
        let client = self.registry.get::<Arc<dyn Client>>(client)?;
        let ctx = self.context(ctx)?;
        let results = client
            .start_call(&ctx, name, SIGNATURE_METHOD, Vec::new())?
            .finish()?;
        let encoded = results
            .first()
            .ok_or_else(|| Error::runtime(format!("empty signature from {:?}", name)))?;
        Ok(serde_json::from_slice(encoded)?)
    }

    pub fn call_send(&self, call: Handle, item: Payload) -> Result<()> {
        self.call(call)?.send(item)
    }

    pub fn call_recv(&self, call: Handle) -> Result<Payload> {
        self.call(call)?.recv()
    }

    pub fn call_close_send(&self, call: Handle) -> Result<()> {
        self.call(call)?.close_send()
    }

    pub fn call_finish(&self, call: Handle) -> Result<Vec<Payload>> {
        self.call(call)?.finish()
    }

    /// Finishes `call` on the blocking pool. Every outcome, including a bad
    /// handle, is reported through `callback`.
    pub fn call_finish_async(&self, call: Handle, callback: CallCallback) {
        match self.call(call) {
            Ok(call) => {
                spawn_completion(&self.handle, callback, move || call.finish());
            }
            Err(err) => {
                callback.fail(err);
            }
        }
    }

    pub fn close_client(&self, client: Handle) -> Result<()> {
        self.registry.get::<Arc<dyn Client>>(client)?.close();
        self.registry.unpin(client)
    }

    pub fn new_server(&self, ctx: Handle) -> Result<Handle> {
        let ctx = self.context(ctx)?;
        let server = self.v23.new_server(&ctx)?;
        Ok(self.registry.pin(server))
    }

    fn server(&self, server: Handle) -> Result<Arc<Arc<dyn Server>>> {
        self.registry.get::<Arc<dyn Server>>(server)
    }

    pub fn listen(&self, server: Handle, spec: &ListenSpec) -> Result<Vec<String>> {
        self.server(server)?.listen(spec)
    }

    pub fn serve(&self, server: Handle, name: &str, dispatcher: Arc<dyn Dispatcher>) -> Result<()> {
        debug!("serve {:?}", name);
        self.server(server)?.serve(name, dispatcher)
    }

    pub fn server_status(&self, server: Handle) -> Result<ServerStatus> {
        Ok(self.server(server)?.status())
    }

    pub fn stop_server(&self, server: Handle) -> Result<()> {
        self.server(server)?.stop()
    }

    /// Pins a server call for the duration of one inbound invocation.
    pub fn pin_server_call(&self, call: Arc<dyn ServerCall>) -> Pinned<Arc<dyn ServerCall>> {
        Pinned::new(&self.registry, call)
    }

    fn server_call(&self, call: Handle) -> Result<Arc<Arc<dyn ServerCall>>> {
        self.registry.get::<Arc<dyn ServerCall>>(call)
    }

    pub fn server_call_send(&self, call: Handle, item: Payload) -> Result<()> {
        self.server_call(call)?.send(item)
    }

    pub fn server_call_recv(&self, call: Handle) -> Result<Payload> {
        self.server_call(call)?.recv()
    }

    pub fn server_call_info(&self, call: Handle) -> Result<CallInfo> {
        Ok(self.server_call(call)?.info().clone())
    }

    /// Globs `pattern` and pins an iterator over the converted replies.
    pub fn glob_with<T, F>(&self, ctx: Handle, pattern: &str, convert: F) -> Result<Handle>
    where
        T: Send + Sync + 'static,
        F: FnMut(GlobReply) -> Result<T> + Send + 'static,
    {
        let ctx = self.context(ctx)?;
        let replies = self.v23.namespace().glob(&ctx, pattern)?;
        Ok(self.pin_iterator(ChannelIterator::spawn(
            &self.handle,
            replies,
            self.config.stream.buffer_size,
            convert,
        )))
    }

    pub fn glob(&self, ctx: Handle, pattern: &str) -> Result<Handle> {
        self.glob_with(ctx, pattern, Ok)
    }

    pub fn mount(&self, ctx: Handle, name: &str, server: &str, ttl: Duration) -> Result<()> {
        let ctx = self.context(ctx)?;
        self.v23.namespace().mount(&ctx, name, server, ttl)
    }

    pub fn unmount(&self, ctx: Handle, name: &str, server: &str) -> Result<()> {
        let ctx = self.context(ctx)?;
        self.v23.namespace().unmount(&ctx, name, server)
    }

    pub fn resolve(&self, ctx: Handle, name: &str) -> Result<MountEntry> {
        let ctx = self.context(ctx)?;
        self.v23.namespace().resolve(&ctx, name)
    }

    /// Advertises until `ctx` is canceled.
    pub fn advertise(&self, ctx: Handle, ad: Advertisement) -> Result<String> {
        let ctx = self.context(ctx)?;
        self.v23.discovery().advertise(&ctx, ad)
    }

    pub fn scan_with<T, F>(&self, ctx: Handle, query: &str, convert: F) -> Result<Handle>
    where
        T: Send + Sync + 'static,
        F: FnMut(Update) -> Result<T> + Send + 'static,
    {
        let ctx = self.context(ctx)?;
        let updates = self.v23.discovery().scan(&ctx, query)?;
        Ok(self.pin_iterator(ChannelIterator::spawn(
            &self.handle,
            updates,
            self.config.stream.buffer_size,
            convert,
        )))
    }

    pub fn scan(&self, ctx: Handle, query: &str) -> Result<Handle> {
        self.scan_with(ctx, query, Ok)
    }

    /// Delivers scan updates to `handler` on the blocking pool until the scan
    /// ends.
    pub fn scan_with_handler(
        &self,
        ctx: Handle,
        query: &str,
        handler: Arc<dyn ScanHandler>,
    ) -> Result<()> {
        let ctx = self.context(ctx)?;
        let mut updates = self.v23.discovery().scan(&ctx, query)?;
        self.handle.spawn_blocking(move || {
            let mut delivered = 0usize;
            while let Some(update) = updates.blocking_recv() {
                handler.on_discovered(update);
                delivered += 1;
            }
            debug!("scan handler done after {} updates", delivered);
        });
        Ok(())
    }

    pub fn pin_iterator<T: Send + Sync + 'static>(&self, iter: ChannelIterator<T>) -> Handle {
        self.registry.pin(PinnedIterator {
            closer: iter.close_handle(),
            reader: Arc::new(Mutex::new(iter)),
        })
    }

    fn reader<T: Send + Sync + 'static>(
        &self,
        iter: Handle,
    ) -> Result<Arc<Mutex<ChannelIterator<T>>>> {
        Ok(Arc::clone(&self.registry.get::<PinnedIterator<T>>(iter)?.reader))
    }

    /// Blocks until the iterator has an item or has ended.
    pub fn iterator_has_next<T: Send + Sync + 'static>(&self, iter: Handle) -> Result<bool> {
        let reader = self.reader::<T>(iter)?;
        let has_next = mutex_lock!(reader).has_next();
        Ok(has_next)
    }

    pub fn iterator_next<T: Send + Sync + 'static>(&self, iter: Handle) -> Result<T> {
        let reader = self.reader::<T>(iter)?;
        let next = mutex_lock!(reader).next_item();
        next
    }

    /// Stops forwarding and wakes any blocked reader; the handle stays valid
    /// until disposed.
    pub fn iterator_close<T: Send + Sync + 'static>(&self, iter: Handle) -> Result<()> {
        self.registry.get::<PinnedIterator<T>>(iter)?.closer.close();
        Ok(())
    }

    pub fn pin_callback(&self, callback: CallCallback) -> Handle {
        self.registry.pin(callback)
    }

    /// Unpins the callback behind `callback` and completes it. Returns false
    /// if it had already fired.
    pub fn complete_callback(&self, callback: Handle, result: Result<Vec<Payload>>) -> Result<bool> {
        let callback = self.registry.take::<CallCallback>(callback)?;
        Ok(callback.complete(result))
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.registry.clear();
        if let Some(tokio) = self.tokio.take() {
            // Inbound invocations may still be parked on the blocking pool.
            tokio.shutdown_background();
        }
    }
}
