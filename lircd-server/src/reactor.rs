//! Reactor-style event loop over the dispatcher's sockets and fifos.
//!
//! One `mio::Poll` drives everything: the three endpoint listeners, every accepted stream, each
//! backend's event fifo, and the process signals. The loop hands readiness to the broker engine
//! and applies the actions it returns; the tick deadline doubles as the poll timeout, so the
//! timeout service keeps running while the daemon is otherwise idle.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use lircd_broker::engine::{BrokerEngine, EngineAction};
use lircd_common::config::RuntimeConfig;
use lircd_common::error::{LircdError, LircdResult};
use lircd_common::ids::Handle;
use mio::net::{UnixListener, UnixStream};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use signal_hook_mio::v1_0::Signals;
use tracing::{debug, info, trace, warn};

use crate::endpoints;
use crate::signals::{self, SignalIntent, SignalLatch};

const CLIENT_LISTENER_TOKEN: Token = Token(0);
const BACKEND_LISTENER_TOKEN: Token = Token(1);
const CONTROL_LISTENER_TOKEN: Token = Token(2);
const SIGNAL_TOKEN: Token = Token(3);
const CONNECTION_TOKEN_START: usize = 4;
const MAX_EVENTS: usize = 64;
const READ_CHUNK_BYTES: usize = 256;
const WRITE_RETRY_LIMIT: usize = 50;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Which endpoint an accepted stream came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEndpoint {
    Client,
    Control,
}

/// The I/O resource behind one connection handle.
enum StreamResource {
    Socket(UnixStream),
    Fifo(File),
}

impl StreamResource {
    fn is_fifo(&self) -> bool {
        matches!(self, Self::Fifo(_))
    }
}

impl Read for StreamResource {
    fn read(&mut self, chunk: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Socket(socket) => socket.read(chunk),
            Self::Fifo(fifo) => fifo.read(chunk),
        }
    }
}

impl Write for StreamResource {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match self {
            Self::Socket(socket) => socket.write(bytes),
            Self::Fifo(fifo) => fifo.write(bytes),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Socket(socket) => socket.flush(),
            Self::Fifo(fifo) => fifo.flush(),
        }
    }
}

/// Single-threaded dispatcher loop.
pub struct DispatcherReactor {
    poll: Poll,
    events: Events,
    client_listener: UnixListener,
    backend_listener: UnixListener,
    control_listener: UnixListener,
    signals: Signals,
    latch: SignalLatch,
    engine: BrokerEngine,
    streams: HashMap<Token, StreamResource>,
    next_token: usize,
    next_tick: Instant,
    shutdown: bool,
    config: RuntimeConfig,
}

impl DispatcherReactor {
    /// Binds the three endpoints, installs the signal source and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `LircdError::Io` when a listener cannot be bound or registered; these errors are
    /// fatal at startup.
    pub fn bind(config: RuntimeConfig) -> LircdResult<Self> {
        let poll =
            Poll::new().map_err(|error| LircdError::Io(format!("create poll failed: {error}")))?;

        let mut client_listener = endpoints::setup_listener(
            &config.client_socket_path,
            config.client_socket_permissions,
        )?;
        poll.registry()
            .register(&mut client_listener, CLIENT_LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| {
                LircdError::Io(format!("register client listener in poll failed: {error}"))
            })?;

        let mut backend_listener = endpoints::setup_listener(&config.backend_socket_path(), 0o666)?;
        poll.registry()
            .register(&mut backend_listener, BACKEND_LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| {
                LircdError::Io(format!("register backend listener in poll failed: {error}"))
            })?;

        let mut control_listener = endpoints::setup_listener(&config.control_socket_path(), 0o666)?;
        poll.registry()
            .register(&mut control_listener, CONTROL_LISTENER_TOKEN, Interest::READABLE)
            .map_err(|error| {
                LircdError::Io(format!("register control listener in poll failed: {error}"))
            })?;

        let mut signal_source = signals::subscribe()?;
        poll.registry()
            .register(&mut signal_source, SIGNAL_TOKEN, Interest::READABLE)
            .map_err(|error| {
                LircdError::Io(format!("register signal source in poll failed: {error}"))
            })?;

        let engine = BrokerEngine::new(
            config.clone(),
            CLIENT_LISTENER_TOKEN.0 as Handle,
            BACKEND_LISTENER_TOKEN.0 as Handle,
            CONTROL_LISTENER_TOKEN.0 as Handle,
        );
        let next_tick = Instant::now() + config.tick_interval;

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            client_listener,
            backend_listener,
            control_listener,
            signals: signal_source,
            latch: SignalLatch::default(),
            engine,
            streams: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            next_tick,
            shutdown: false,
            config,
        })
    }

    /// Runs the loop until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns `LircdError::Io` when polling or accepting fails unrecoverably.
    pub fn run(&mut self) -> LircdResult<()> {
        info!(socket = %self.config.client_socket_path.display(), "dispatcher ready");
        while !self.shutdown {
            let _ = self.poll_once()?;
        }
        self.close_all_connections();
        Ok(())
    }

    /// Drains pending signals, runs one readiness cycle and delivers due ticks.
    ///
    /// # Errors
    ///
    /// Returns `LircdError::Io` when the poll wait or an accept fails.
    pub fn poll_once(&mut self) -> LircdResult<usize> {
        self.dispatch_pending_signal();
        if self.shutdown {
            return Ok(0);
        }

        let timeout = self.next_tick.saturating_duration_since(Instant::now());
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {
                self.deliver_due_ticks();
                return Ok(0);
            }
            Err(error) => return Err(LircdError::Io(format!("poll wait failed: {error}"))),
        }
        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for token in &ready {
            if *token == CLIENT_LISTENER_TOKEN {
                self.accept_streams(StreamEndpoint::Client)?;
            } else if *token == CONTROL_LISTENER_TOKEN {
                self.accept_streams(StreamEndpoint::Control)?;
            } else if *token == BACKEND_LISTENER_TOKEN {
                self.accept_backends()?;
            } else if *token == SIGNAL_TOKEN {
                self.latch_pending_signals();
            } else {
                self.handle_stream_event(*token);
            }
        }
        self.deliver_due_ticks();
        Ok(ready.len())
    }

    fn dispatch_pending_signal(&mut self) {
        match self.latch.take() {
            Some(SignalIntent::Shutdown(signal)) => {
                info!(signal, "caught signal, shutting down");
                self.shutdown = true;
            }
            Some(SignalIntent::Reload) => {
                let actions = self.engine.on_reload();
                self.apply_actions(actions);
            }
            None => {}
        }
    }

    fn latch_pending_signals(&mut self) {
        for signal in self.signals.pending() {
            trace!(signal, "latched signal");
            self.latch.latch(signal);
        }
    }

    fn accept_streams(&mut self, endpoint: StreamEndpoint) -> LircdResult<()> {
        loop {
            let accepted = match endpoint {
                StreamEndpoint::Client => self.client_listener.accept(),
                StreamEndpoint::Control => self.control_listener.accept(),
            };
            match accepted {
                Ok((mut socket, _peer)) => {
                    let token = self.allocate_token();
                    self.poll
                        .registry()
                        .register(&mut socket, token, Interest::READABLE)
                        .map_err(|error| {
                            LircdError::Io(format!(
                                "register accepted connection in poll failed: {error}"
                            ))
                        })?;
                    let handle = token.0 as Handle;
                    let actions = match endpoint {
                        StreamEndpoint::Client => self.engine.accept_client(handle),
                        StreamEndpoint::Control => self.engine.accept_control(handle),
                    };
                    self.streams.insert(token, StreamResource::Socket(socket));
                    self.apply_actions(actions);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => {
                    return Err(LircdError::Io(format!("accept connection failed: {error}")));
                }
            }
        }
    }

    fn accept_backends(&mut self) -> LircdResult<()> {
        loop {
            match self.backend_listener.accept() {
                Ok((mut socket, _peer)) => {
                    let cmd_token = self.allocate_token();
                    let fifo_path = self.config.data_fifo_path(cmd_token.0 as Handle);
                    let fifo = match endpoints::create_data_fifo(&fifo_path) {
                        Ok(fifo) => fifo,
                        Err(error) => {
                            warn!(%error, "cannot set up backend fifo, dropping backend");
                            let _ = socket.shutdown(Shutdown::Both);
                            continue;
                        }
                    };
                    self.poll
                        .registry()
                        .register(&mut socket, cmd_token, Interest::READABLE)
                        .map_err(|error| {
                            LircdError::Io(format!(
                                "register backend command channel failed: {error}"
                            ))
                        })?;
                    let data_token = self.allocate_token();
                    self.poll
                        .registry()
                        .register(
                            &mut SourceFd(&fifo.as_raw_fd()),
                            data_token,
                            Interest::READABLE,
                        )
                        .map_err(|error| {
                            LircdError::Io(format!("register backend fifo failed: {error}"))
                        })?;
                    debug!(
                        cmd = cmd_token.0,
                        data = data_token.0,
                        "accepted backend connection"
                    );
                    let actions = self.engine.accept_backend(
                        cmd_token.0 as Handle,
                        data_token.0 as Handle,
                        fifo_path,
                    );
                    self.streams.insert(cmd_token, StreamResource::Socket(socket));
                    self.streams.insert(data_token, StreamResource::Fifo(fifo));
                    self.apply_actions(actions);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(error) => {
                    return Err(LircdError::Io(format!("accept backend failed: {error}")));
                }
            }
        }
    }

    fn handle_stream_event(&mut self, token: Token) {
        let handle = token.0 as Handle;
        let mut data = Vec::new();
        let mut lost = false;
        {
            let Some(resource) = self.streams.get_mut(&token) else {
                return;
            };
            let mut chunk = [0_u8; READ_CHUNK_BYTES];
            loop {
                match resource.read(&mut chunk) {
                    Ok(0) => {
                        lost = true;
                        break;
                    }
                    Ok(read_len) => data.extend_from_slice(&chunk[..read_len]),
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(error) => {
                        debug!(handle, %error, "read failed");
                        lost = true;
                        break;
                    }
                }
            }
            if lost && resource.is_fifo() && !self.engine.backend_registered(handle) {
                // A fifo reads as end-of-file until the backend attaches its writer; with no
                // registration completed that is idle state, not a loss.
                lost = false;
            }
        }
        if !data.is_empty() {
            let actions = self.engine.ingest(handle, &data);
            self.apply_actions(actions);
        }
        if lost {
            let actions = self.engine.connection_lost(handle);
            self.apply_actions(actions);
        }
    }

    fn deliver_due_ticks(&mut self) {
        while Instant::now() >= self.next_tick {
            self.next_tick += self.config.tick_interval;
            let actions = self.engine.on_tick();
            self.apply_actions(actions);
        }
    }

    fn apply_actions(&mut self, actions: Vec<EngineAction>) {
        let mut queue: VecDeque<EngineAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                EngineAction::Send { handle, bytes } => {
                    let token = Token(handle as usize);
                    let Some(resource) = self.streams.get_mut(&token) else {
                        trace!(handle, "dropping write to unknown handle");
                        continue;
                    };
                    if let Err(error) = write_best_effort(resource, &bytes) {
                        debug!(handle, %error, "write failed, dropping connection");
                        queue.extend(self.engine.connection_lost(handle));
                    }
                }
                EngineAction::Close { handle } => self.drop_stream(Token(handle as usize)),
                EngineAction::ReleaseFifo { path } => {
                    if let Err(error) = fs::remove_file(&path)
                        && error.kind() != io::ErrorKind::NotFound
                    {
                        warn!(path = %path.display(), %error, "cannot unlink fifo name");
                    }
                }
            }
        }
    }

    fn drop_stream(&mut self, token: Token) {
        let Some(resource) = self.streams.remove(&token) else {
            return;
        };
        match resource {
            StreamResource::Socket(mut socket) => {
                let _ = self.poll.registry().deregister(&mut socket);
                let _ = socket.shutdown(Shutdown::Both);
            }
            StreamResource::Fifo(fifo) => {
                let _ = self
                    .poll
                    .registry()
                    .deregister(&mut SourceFd(&fifo.as_raw_fd()));
            }
        }
    }

    fn close_all_connections(&mut self) {
        info!("closing all connections");
        let tokens: Vec<Token> = self.streams.keys().copied().collect();
        for token in tokens {
            self.drop_stream(token);
        }
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        token
    }
}

/// Best-effort blocking write with a short retry on partial progress.
fn write_best_effort(resource: &mut StreamResource, bytes: &[u8]) -> io::Result<()> {
    let mut remaining = bytes;
    let mut retries = 0_usize;
    while !remaining.is_empty() {
        match resource.write(remaining) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer stopped accepting data",
                ));
            }
            Ok(written) => {
                remaining = &remaining[written..];
                retries = 0;
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                retries += 1;
                if retries > WRITE_RETRY_LIMIT {
                    return Err(error);
                }
                std::thread::sleep(WRITE_RETRY_DELAY);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "reactor/tests.rs"]
mod tests;
