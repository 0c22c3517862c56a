//! Book-keeping data for all open connections.
//!
//! Connections are related two ways. A caller stream is *bound* to a backend while a command is
//! in flight; the relation is symmetric and recorded on both sides. Backend sockets always come
//! in command/data *peer* pairs with a fixed relation from registration until teardown. Both
//! relations store opaque handles rather than references, so teardown is purely structural.

use std::collections::BTreeMap;
use std::path::PathBuf;

use lircd_common::ids::Handle;
use lircd_proto::line_buffer::LineBuffer;
use lircd_proto::reply_parser::ReplyParser;
use tracing::debug;

/// Role of one tracked handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    /// Listener where clients connect.
    ClientListen,
    /// Listener where backends connect.
    BackendListen,
    /// Listener where control applications connect.
    ControlListen,
    /// Accepted client stream.
    ClientStream,
    /// Accepted control stream.
    ControlStream,
    /// Backend command channel.
    BackendCmd,
    /// Backend decoded-event channel.
    BackendData,
    /// Not yet classified.
    Undefined,
}

/// Command engagement of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// No command in flight.
    None,
    /// Engaged with the dispatcher itself (registration handshake).
    Local,
    /// Engaged with another tracked connection.
    Peer(Handle),
}

/// Housekeeping data for one open handle.
#[derive(Debug)]
pub struct Connection {
    /// Opaque stream identifier, also the reactor's poll token.
    pub handle: Handle,
    /// Role of the handle.
    pub kind: ConnKind,
    /// Fixed command/data relation of a backend pair.
    pub peer: Option<Handle>,
    /// Transient command engagement.
    pub bound_to: Binding,
    /// Backend identity `name@device`, set on registration.
    pub identity: Option<String>,
    /// Directive a caller is currently waiting to hear a reply for.
    pub expected_directive: Option<String>,
    /// Timeout countdown; `-1` is disarmed.
    pub ticks_remaining: i32,
    /// Input line buffering.
    pub line_buffer: LineBuffer,
    /// Reply reassembly, command channels only.
    pub reply_parser: Option<ReplyParser>,
    /// Fifo pathname reserved for this backend, until the name is released.
    pub fifo_path: Option<PathBuf>,
    /// Backend process id reported during registration.
    pub backend_pid: Option<u32>,
    /// Registration sequence number, set at promotion.
    pub registered_at: Option<u64>,
    /// A routed STOP_BACKEND is awaiting its reply.
    pub stop_pending: bool,
}

impl Connection {
    fn new(handle: Handle, kind: ConnKind) -> Self {
        Self {
            handle,
            kind,
            peer: None,
            bound_to: Binding::None,
            identity: None,
            expected_directive: None,
            ticks_remaining: -1,
            line_buffer: LineBuffer::new(),
            reply_parser: None,
            fifo_path: None,
            backend_pid: None,
            registered_at: None,
            stop_pending: false,
        }
    }

    /// Reports whether this is a backend command channel that completed registration.
    #[must_use]
    pub fn is_registered_backend(&self) -> bool {
        self.kind == ConnKind::BackendCmd && self.registered_at.is_some()
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(0, ConnKind::Undefined)
    }
}

/// Registry of all open handles plus the default-backend selection.
///
/// The three well-known listeners are installed at construction and stay for the daemon's
/// lifetime; everything else is dynamically added and removed. The map is ordered so broadcast
/// and listing walk connections deterministically.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: BTreeMap<Handle, Connection>,
    default_backend: Option<Handle>,
}

impl ConnectionTable {
    /// Creates a table holding the three endpoint listeners.
    #[must_use]
    pub fn new(client_listen: Handle, backend_listen: Handle, control_listen: Handle) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(client_listen, Connection::new(client_listen, ConnKind::ClientListen));
        entries.insert(backend_listen, Connection::new(backend_listen, ConnKind::BackendListen));
        entries.insert(control_listen, Connection::new(control_listen, ConnKind::ControlListen));
        Self {
            entries,
            default_backend: None,
        }
    }

    /// Installs an accepted client or control stream.
    pub fn add_stream(&mut self, handle: Handle, kind: ConnKind) {
        self.entries.insert(handle, Connection::new(handle, kind));
    }

    /// Installs a backend command/data pair with its reserved fifo pathname.
    pub fn add_backend_pair(&mut self, cmd: Handle, data: Handle, fifo_path: PathBuf) {
        let mut cmd_item = Connection::new(cmd, ConnKind::BackendCmd);
        cmd_item.peer = Some(data);
        cmd_item.reply_parser = Some(ReplyParser::new());
        cmd_item.fifo_path = Some(fifo_path);
        let mut data_item = Connection::new(data, ConnKind::BackendData);
        data_item.peer = Some(cmd);
        self.entries.insert(cmd, cmd_item);
        self.entries.insert(data, data_item);
    }

    /// Looks up one connection.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&Connection> {
        self.entries.get(&handle)
    }

    /// Looks up one connection mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Connection> {
        self.entries.get_mut(&handle)
    }

    /// Reports whether a handle is tracked.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Removes one connection, returning it.
    pub fn remove(&mut self, handle: Handle) -> Option<Connection> {
        self.entries.remove(&handle)
    }

    /// Iterates all connections in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.values()
    }

    /// Returns the handles of all unbound client streams, in handle order.
    #[must_use]
    pub fn broadcast_targets(&self) -> Vec<Handle> {
        self.entries
            .values()
            .filter(|connection| {
                connection.kind == ConnKind::ClientStream && connection.bound_to == Binding::None
            })
            .map(|connection| connection.handle)
            .collect()
    }

    /// Returns the handles of all client streams.
    #[must_use]
    pub fn client_streams(&self) -> Vec<Handle> {
        self.entries
            .values()
            .filter(|connection| connection.kind == ConnKind::ClientStream)
            .map(|connection| connection.handle)
            .collect()
    }

    /// Finds a registered backend by exact identity.
    #[must_use]
    pub fn find_backend_by_identity(&self, identity: &str) -> Option<Handle> {
        self.entries
            .values()
            .find(|connection| {
                connection.is_registered_backend()
                    && connection.identity.as_deref() == Some(identity)
            })
            .map(|connection| connection.handle)
    }

    /// Returns registered backend handles in registration order.
    #[must_use]
    pub fn registered_backends(&self) -> Vec<Handle> {
        let mut backends: Vec<(u64, Handle)> = self
            .entries
            .values()
            .filter_map(|connection| {
                connection
                    .registered_at
                    .map(|sequence| (sequence, connection.handle))
            })
            .collect();
        backends.sort_unstable();
        backends.into_iter().map(|(_, handle)| handle).collect()
    }

    /// Returns the current default backend.
    #[must_use]
    pub fn default_backend(&self) -> Option<Handle> {
        self.default_backend
    }

    /// Replaces the default backend selection.
    pub fn set_default_backend(&mut self, backend: Option<Handle>) {
        self.default_backend = backend;
    }

    /// Returns the most recently registered surviving backend, if any.
    #[must_use]
    pub fn most_recent_registered(&self) -> Option<Handle> {
        self.registered_backends().into_iter().next_back()
    }

    /// Marks a caller and a backend as engaged with each other and arms the caller's timeout.
    pub fn bind(&mut self, caller: Handle, backend: Handle, timeout_ticks: i32) {
        debug!(caller, backend, "binding caller to backend");
        if let Some(connection) = self.entries.get_mut(&backend) {
            connection.bound_to = Binding::Peer(caller);
        }
        if let Some(connection) = self.entries.get_mut(&caller) {
            connection.bound_to = Binding::Peer(backend);
            connection.ticks_remaining = timeout_ticks;
        }
    }

    /// Dissolves the binding held by `handle`, given either of the two parties.
    ///
    /// Returns the other party when the binding pointed at a real connection.
    pub fn unbind(&mut self, handle: Handle) -> Option<Handle> {
        let connection = self.entries.get_mut(&handle)?;
        let bound = connection.bound_to;
        connection.bound_to = Binding::None;
        connection.ticks_remaining = -1;
        let Binding::Peer(other) = bound else {
            return None;
        };
        if let Some(other_side) = self.entries.get_mut(&other) {
            other_side.bound_to = Binding::None;
            other_side.ticks_remaining = -1;
        }
        Some(other)
    }

    /// Resolves the command-channel handle of a backend pair, given either side.
    #[must_use]
    pub fn backend_cmd_of(&self, handle: Handle) -> Option<Handle> {
        let connection = self.entries.get(&handle)?;
        match connection.kind {
            ConnKind::BackendCmd => Some(handle),
            ConnKind::BackendData => connection.peer,
            _ => None,
        }
    }

    /// Removes a backend pair, given either side, returning the removed connections.
    pub fn remove_backend_pair(&mut self, handle: Handle) -> Vec<Connection> {
        let mut removed = Vec::with_capacity(2);
        let Some(connection) = self.entries.remove(&handle) else {
            return removed;
        };
        let peer = connection.peer;
        removed.push(connection);
        if let Some(peer) = peer
            && let Some(peer_connection) = self.entries.remove(&peer)
        {
            removed.push(peer_connection);
        }
        removed
    }

    /// Returns the number of tracked connections, listeners included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
