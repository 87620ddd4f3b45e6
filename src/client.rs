use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream, ToSocketAddrs,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::Error;
use crate::frame::{self, DEFAULT_MAX_FRAME_SIZE};
use crate::handle::HandleAllocator;
use crate::pending::PendingTable;
use crate::value::{MethodCall, Response, Value};
use crate::xml;

type CallbackHandler = Box<dyn Fn(MethodCall) + Send + Sync>;
type ConnectedHandler = Box<dyn Fn() + Send + Sync>;
type DisconnectedHandler = Box<dyn Fn() + Send + Sync>;

/// The connection's lifecycle. `call` only succeeds in `Connected`;
/// `disconnect` is a no-op outside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
}

/// Tuning for [`Client::connect`].
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Additional attempts after the first, each separated by `retry_backoff`.
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Deadline for the one-time `GBXRemote 2` banner.
    pub handshake_timeout: Duration,
    pub max_frame_size: u32,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            retries: 0,
            retry_backoff: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(1),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectOptions {
    /// Set the number of additional connect attempts after the first.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay between connect attempts.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the deadline for the one-time connect banner.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the maximum frame body size accepted from the server.
    pub fn with_max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = size;
        self
    }
}

/// Releases a call's pending-table slot when it goes out of scope,
/// regardless of whether that happens because the reply arrived or because
/// the awaiting future itself was dropped (e.g. by an enclosing
/// `tokio::time::timeout`). Cancelling an already-completed handle is a
/// harmless no-op, so this runs unconditionally on drop.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    handle: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.handle);
    }
}

struct Inner {
    state: Mutex<ClientState>,
    write_half: AsyncMutex<Option<OwnedWriteHalf>>,
    pending: PendingTable,
    handles: HandleAllocator,
    callback_handlers: Mutex<Vec<CallbackHandler>>,
    connected_handlers: Mutex<Vec<ConnectedHandler>>,
    disconnected_handlers: Mutex<Vec<DisconnectedHandler>>,
}

/// A handle to one GBX remote-control connection.
///
/// Cheap to clone: every clone shares the same underlying connection, write
/// serialization and subscriber lists.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("state", &self.state()).finish()
    }
}

impl Client {
    /// A client with no connection yet. Call [`Client::connect`] to dial in.
    pub fn new() -> Client {
        Client {
            inner: Arc::new(Inner {
                state: Mutex::new(ClientState::Disconnected),
                write_half: AsyncMutex::new(None),
                pending: PendingTable::new(),
                handles: HandleAllocator::new(),
                callback_handlers: Mutex::new(Vec::new()),
                connected_handlers: Mutex::new(Vec::new()),
                disconnected_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock().expect("state mutex poisoned")
    }

    /// Dial `addr`, read the connect banner, and start the receive loop.
    ///
    /// Retries `opts.retries` additional times on failure, waiting
    /// `opts.retry_backoff` between attempts. Reconnecting an already
    /// connected client tears down the previous connection first.
    pub async fn connect<A>(&self, addr: A, opts: ConnectOptions) -> Result<(), Error>
    where
        A: ToSocketAddrs + Clone,
    {
        if self.state() == ClientState::Connected {
            self.disconnect().await;
        }
        self.set_state(ClientState::Connecting);

        let mut attempt = 0;
        loop {
            match self.try_connect(addr.clone(), &opts).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt >= opts.retries {
                        self.set_state(ClientState::Disconnected);
                        return Err(e);
                    }
                    log::warn!("connect attempt {attempt} failed: {e}");
                    attempt += 1;
                    tokio::time::sleep(opts.retry_backoff).await;
                }
            }
        }
    }

    async fn try_connect<A>(&self, addr: A, opts: &ConnectOptions) -> Result<(), Error>
    where
        A: ToSocketAddrs,
    {
        self.set_state(ClientState::Handshaking);
        let mut stream = TcpStream::connect(addr).await?;
        frame::read_banner(&mut stream, opts.handshake_timeout).await?;

        let (read_half, write_half) = stream.into_split();
        *self.inner.write_half.lock().await = Some(write_half);

        self.set_state(ClientState::Connected);
        self.fire_connected();
        self.spawn_receive_loop(read_half, opts.max_frame_size);
        Ok(())
    }

    /// Close the connection. A no-op unless currently `Connected`.
    pub async fn disconnect(&self) {
        if self.state() != ClientState::Connected {
            return;
        }
        self.set_state(ClientState::Disconnecting);
        self.teardown(Error::Cancelled).await;
    }

    /// Tear down the connection, failing every pending call with `reason`.
    /// `reason` is `Cancelled` for an explicit `disconnect` and `Closed` for
    /// a receive loop that found the socket gone out from under it.
    async fn teardown(&self, reason: Error) {
        *self.inner.write_half.lock().await = None;
        let cancelled = matches!(reason, Error::Cancelled);
        self.inner.pending.fail_all(|| if cancelled { Error::Cancelled } else { Error::Closed });
        self.set_state(ClientState::Disconnected);
        self.fire_disconnected();
    }

    /// Issue a method call and await its response.
    ///
    /// Resolves to `Err(Error::Fault { .. })` for a well-formed XML-RPC
    /// fault; any other error is transport-level (the connection dropped,
    /// the reply failed to decode, the call was cancelled, or the client
    /// was never connected).
    ///
    /// Dropping the returned future before it resolves — for instance by
    /// racing it inside `tokio::time::timeout` — releases the pending-table
    /// slot immediately rather than leaking it until a reply eventually
    /// arrives for a handle nobody is listening on anymore.
    pub async fn call(&self, method: impl Into<String>, params: Vec<Value>) -> Result<Value, Error> {
        if self.state() != ClientState::Connected {
            return Err(Error::NotConnected);
        }

        let (handle, rx) = loop {
            let candidate = self.inner.handles.next();
            match self.inner.pending.try_register(candidate) {
                Some(rx) => break (candidate, rx),
                None => log::warn!("handle {candidate:#x} still in flight, reallocating"),
            }
        };
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            handle,
        };

        let body = xml::encode_method_call(&MethodCall {
            name: method.into(),
            params,
        });

        let write_result = {
            let mut guard = self.inner.write_half.lock().await;
            match guard.as_mut() {
                Some(writer) => frame::write_frame(writer, handle, body.as_bytes()).await,
                None => Err(Error::NotConnected),
            }
        };
        if let Err(e) = write_result {
            return Err(e);
        }

        let body = rx.await.map_err(|_| Error::Closed)??;
        let text = std::str::from_utf8(&body).map_err(|e| Error::Decode(e.to_string()))?;
        match xml::decode_response(text)? {
            Response::Value(v) => Ok(v),
            Response::Fault { code, message } => Err(Error::Fault { code, message }),
        }
    }

    /// Register a handler invoked for every server-initiated callback, in
    /// registration order. Handlers run on the receive loop's dispatch
    /// tasks and must not block.
    pub fn subscribe_callback<F>(&self, handler: F)
    where
        F: Fn(MethodCall) + Send + Sync + 'static,
    {
        self.inner
            .callback_handlers
            .lock()
            .expect("callback handlers mutex poisoned")
            .push(Box::new(handler));
    }

    pub fn subscribe_connected<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .connected_handlers
            .lock()
            .expect("connected handlers mutex poisoned")
            .push(Box::new(handler));
    }

    pub fn subscribe_disconnected<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .disconnected_handlers
            .lock()
            .expect("disconnected handlers mutex poisoned")
            .push(Box::new(handler));
    }

    fn set_state(&self, state: ClientState) {
        *self.inner.state.lock().expect("state mutex poisoned") = state;
    }

    fn fire_connected(&self) {
        let handlers = self.inner.connected_handlers.lock().expect("connected handlers mutex poisoned");
        for handler in handlers.iter() {
            handler();
        }
    }

    fn fire_disconnected(&self) {
        let handlers = self
            .inner
            .disconnected_handlers
            .lock()
            .expect("disconnected handlers mutex poisoned");
        for handler in handlers.iter() {
            handler();
        }
    }

    /// Decode and dispatch one callback frame's body. Both the XML parse and
    /// the handler calls happen off the receive loop so a slow or malformed
    /// callback never stalls the next frame; a handler that panics is
    /// logged rather than silently swallowed.
    fn dispatch_callback(&self, handle: u32, body: Vec<u8>) {
        let inner = self.inner.clone();
        let worker = tokio::spawn(async move {
            let text = std::str::from_utf8(&body).map_err(|e| Error::Decode(e.to_string()))?;
            let call = xml::decode_method_call(text)?;
            let handlers = inner.callback_handlers.lock().expect("callback handlers mutex poisoned");
            for handler in handlers.iter() {
                handler(call.clone());
            }
            Ok::<(), Error>(())
        });
        tokio::spawn(async move {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("dropping malformed callback on handle {handle:#x}: {e}"),
                Err(e) => log::warn!("callback handler on handle {handle:#x} panicked: {e}"),
            }
        });
    }

    fn spawn_receive_loop(&self, mut read_half: OwnedReadHalf, max_frame_size: u32) {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                match frame::read_frame(&mut read_half, max_frame_size).await {
                    Ok((header, body)) => client.handle_frame(header, body),
                    Err(e) => {
                        log::debug!("receive loop exiting: {e}");
                        break;
                    }
                }
            }
            // The socket is already unusable; drive the same teardown
            // `disconnect` would, but unconditionally, since another task
            // racing a concurrent `disconnect()` has already set the state
            // we would otherwise skip past.
            if client.state() == ClientState::Connected {
                client.set_state(ClientState::Disconnecting);
                client.teardown(Error::Closed).await;
            }
        });
    }

    /// Route one frame by its handle's high bit. Neither branch decodes the
    /// body here: a response hands its raw bytes to the waiting `call`,
    /// which decodes on its own task, and a callback's decode happens in
    /// the task `dispatch_callback` spawns for it. The receive loop itself
    /// only ever reads the next frame.
    fn handle_frame(&self, header: frame::FrameHeader, body: Vec<u8>) {
        if header.is_response() {
            self.inner.pending.complete(header.handle, Ok(body));
        } else {
            self.dispatch_callback(header.handle, body);
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Client::new()
    }
}
