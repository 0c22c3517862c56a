//! Broker engine: registration handshake, command routing, reply forwarding, broadcast, and
//! the tick-based timeout service.
//!
//! Each entry point mutates the connection table and returns the I/O the reactor must perform.
//! Write failures feed back through [`BrokerEngine::connection_lost`], which makes teardown a
//! plain table operation no matter which side disappeared first.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use lircd_common::config::RuntimeConfig;
use lircd_common::ids::Handle;
use lircd_proto::frame::{SimulateKey, error_frame, sighup_frame, split_directive};
use lircd_proto::reply_parser::{ParserState, ReplyOutcome};
use tracing::{debug, error, info, trace, warn};

use crate::directives::{ControlDispatch, ControlRegistry, LegacyRegistry, RoutedForm};
use crate::table::{Binding, ConnKind, ConnectionTable};

const GET_BACKEND_INFO_CMD: &str = "GET_BACKEND_INFO";
const SET_DATA_SOCKET_CMD: &str = "SET_DATA_SOCKET";

/// One I/O effect for the reactor to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Write bytes to a handle, best-effort; a failure comes back as `connection_lost`.
    Send {
        /// Destination connection.
        handle: Handle,
        /// Encoded wire bytes.
        bytes: Vec<u8>,
    },
    /// Drop the I/O resource behind a handle; its table entry is already gone.
    Close {
        /// Connection to drop.
        handle: Handle,
    },
    /// Unlink a fifo pathname that is no longer needed.
    ReleaseFifo {
        /// Pathname to remove.
        path: PathBuf,
    },
}

/// How the outgoing command line is derived once a binding is secured.
///
/// The rewrite runs only after the busy check, so a busy backend is always reported as busy
/// even when the directive also carries a malformed payload.
#[derive(Debug, Clone, Copy)]
enum WireRewrite<'a> {
    /// Forward the caller's line unchanged (legacy endpoint).
    Verbatim(&'a str),
    /// Emit the bare directive; the backend selector carried no further arguments.
    BackendOnly,
    /// Emit the directive plus the argument remainder after the stripped selector.
    BackendWithArg(&'a str),
    /// Emit the directive plus the re-encoded key event.
    Simulate(&'a str),
}

/// The dispatcher's broker state machine.
pub struct BrokerEngine {
    pub(crate) table: ConnectionTable,
    pub(crate) config: RuntimeConfig,
    pub(crate) input_log: Option<File>,
    control: ControlRegistry,
    legacy: LegacyRegistry,
    registration_seq: u64,
}

impl BrokerEngine {
    /// Creates the engine with the three endpoint listener handles installed.
    #[must_use]
    pub fn new(
        config: RuntimeConfig,
        client_listen: Handle,
        backend_listen: Handle,
        control_listen: Handle,
    ) -> Self {
        Self {
            table: ConnectionTable::new(client_listen, backend_listen, control_listen),
            config,
            input_log: None,
            control: ControlRegistry::with_builtin_directives(),
            legacy: LegacyRegistry::with_builtin_directives(),
            registration_seq: 0,
        }
    }

    /// Read access to the connection table, for diagnostics and tests.
    #[must_use]
    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    /// Returns the current default backend handle.
    #[must_use]
    pub fn default_backend(&self) -> Option<Handle> {
        self.table.default_backend()
    }

    /// Reports whether a handle belongs to a backend pair that completed registration.
    #[must_use]
    pub fn backend_registered(&self, handle: Handle) -> bool {
        self.table
            .backend_cmd_of(handle)
            .and_then(|cmd| self.table.get(cmd))
            .is_some_and(|connection| connection.is_registered_backend())
    }

    /// Installs an accepted client stream.
    pub fn accept_client(&mut self, handle: Handle) -> Vec<EngineAction> {
        debug!(handle, "registering client");
        self.table.add_stream(handle, ConnKind::ClientStream);
        Vec::new()
    }

    /// Installs an accepted control stream.
    pub fn accept_control(&mut self, handle: Handle) -> Vec<EngineAction> {
        debug!(handle, "registering control client");
        self.table.add_stream(handle, ConnKind::ControlStream);
        Vec::new()
    }

    /// Installs a freshly accepted backend pair and starts the registration handshake.
    ///
    /// The reactor has already created the data fifo at `fifo_path` and opened it for reading;
    /// the pathname is kept until the backend confirms `SET_DATA_SOCKET`.
    pub fn accept_backend(
        &mut self,
        cmd: Handle,
        data: Handle,
        fifo_path: PathBuf,
    ) -> Vec<EngineAction> {
        debug!(cmd, data, path = %fifo_path.display(), "registering backend");
        self.table.add_backend_pair(cmd, data, fifo_path);
        if let Some(connection) = self.table.get_mut(cmd) {
            connection.bound_to = Binding::Local;
        }
        vec![EngineAction::Send {
            handle: cmd,
            bytes: format!("{GET_BACKEND_INFO_CMD}\n").into_bytes(),
        }]
    }

    /// Feeds raw bytes from one connection and processes every completed line.
    pub fn ingest(&mut self, handle: Handle, bytes: &[u8]) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let overflowed = {
            let Some(connection) = self.table.get_mut(handle) else {
                return actions;
            };
            connection.line_buffer.append(bytes);
            connection.line_buffer.is_overflowed()
        };
        if overflowed {
            warn!(handle, "input line exceeds the packet bound, dropping connection");
            self.remove_any(handle, &mut actions);
            return actions;
        }
        self.drain_lines(handle, &mut actions);
        actions
    }

    /// Handles a read EOF or write failure on any connection.
    pub fn connection_lost(&mut self, handle: Handle) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.table.contains(handle) {
            debug!(handle, "connection lost");
            self.remove_any(handle, &mut actions);
        }
        actions
    }

    /// Advances the timeout countdown of every armed caller by one tick.
    pub fn on_tick(&mut self) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let armed: Vec<Handle> = self
            .table
            .iter()
            .filter(|connection| {
                matches!(
                    connection.kind,
                    ConnKind::ClientStream | ConnKind::ControlStream
                ) && connection.ticks_remaining > 0
            })
            .map(|connection| connection.handle)
            .collect();
        for handle in armed {
            let expired = {
                let Some(connection) = self.table.get_mut(handle) else {
                    continue;
                };
                trace!(handle, ticks = connection.ticks_remaining, "tick");
                connection.ticks_remaining -= 1;
                connection.ticks_remaining == 0
            };
            if !expired {
                continue;
            }
            debug!(handle, "command timed out, disconnecting binding");
            let expected = self.expected_directive_of(handle);
            actions.push(EngineAction::Send {
                handle,
                bytes: error_frame(&expected, "TIMEOUT"),
            });
            self.table.unbind(handle);
            self.drain_lines(handle, &mut actions);
        }
        actions
    }

    /// Pushes the unsolicited SIGHUP frame to every client stream after a reload.
    pub fn on_reload(&mut self) -> Vec<EngineAction> {
        info!("configuration reloaded, notifying clients");
        self.table
            .client_streams()
            .into_iter()
            .map(|handle| EngineAction::Send {
                handle,
                bytes: sighup_frame(),
            })
            .collect()
    }

    fn drain_lines(&mut self, handle: Handle, actions: &mut Vec<EngineAction>) {
        loop {
            let (kind, line) = {
                let Some(connection) = self.table.get_mut(handle) else {
                    return;
                };
                let caller_side = matches!(
                    connection.kind,
                    ConnKind::ClientStream | ConnKind::ControlStream
                );
                if caller_side && connection.bound_to != Binding::None {
                    // One command in flight per caller: further directives wait in the buffer
                    // until the binding dissolves.
                    return;
                }
                match connection.line_buffer.next_line() {
                    Some(line) => (connection.kind, line),
                    None => return,
                }
            };
            match kind {
                ConnKind::ClientStream => self.handle_client_line(handle, &line, actions),
                ConnKind::ControlStream => self.handle_control_line(handle, &line, actions),
                ConnKind::BackendCmd => self.handle_backend_line(handle, &line, actions),
                ConnKind::BackendData => self.handle_event_line(handle, &line, actions),
                other => warn!(handle, kind = ?other, "input on unexpected connection kind"),
            }
        }
    }

    /// Client lines are directives for the default backend.
    fn handle_client_line(&mut self, caller: Handle, line: &str, actions: &mut Vec<EngineAction>) {
        let Some((directive, _args)) = split_directive(line) else {
            debug!(caller, "empty client line");
            return;
        };
        if !self.legacy.contains(directive) {
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, &format!("unknown directive: \"{directive}\"")),
            });
            return;
        }
        let Some(backend) = self.table.default_backend() else {
            debug!(caller, "no backend available");
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, "Backend unavailable"),
            });
            return;
        };
        self.route_to_backend(
            caller,
            backend,
            directive,
            line,
            WireRewrite::Verbatim(line),
            false,
            actions,
        );
    }

    /// Control lines are answered locally or routed to the backend named by the first argument.
    fn handle_control_line(&mut self, caller: Handle, line: &str, actions: &mut Vec<EngineAction>) {
        let Some((directive, args)) = split_directive(line) else {
            debug!(caller, "empty control line");
            return;
        };
        let Some(spec) = self.control.lookup(directive).copied() else {
            debug!(caller, directive, "unknown control command");
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, &format!("Unknown command: {directive}")),
            });
            return;
        };
        match spec.dispatch {
            ControlDispatch::Local(handler) => handler(self, caller, line, args, actions),
            ControlDispatch::Routed(form) => {
                self.route_control_directive(caller, line, directive, args, form, actions);
            }
        }
    }

    fn route_control_directive(
        &mut self,
        caller: Handle,
        line: &str,
        directive: &str,
        args: &str,
        form: RoutedForm,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some((backend_name, payload)) = split_directive(args) else {
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, &format!("Missing backend: \"{line}\"")),
            });
            return;
        };
        // Unknown backend outranks bad arguments.
        let Some(backend) = self.table.find_backend_by_identity(backend_name) else {
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, &format!("No such backend: {backend_name}")),
            });
            return;
        };
        let arity_ok = match form {
            RoutedForm::BackendOnly => payload.is_empty(),
            RoutedForm::BackendWithArg | RoutedForm::Simulate => !payload.is_empty(),
        };
        if !arity_ok {
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, &format!("Bad arguments: {args}")),
            });
            return;
        }
        let rewrite = match form {
            RoutedForm::BackendOnly => WireRewrite::BackendOnly,
            RoutedForm::BackendWithArg => WireRewrite::BackendWithArg(payload),
            RoutedForm::Simulate => WireRewrite::Simulate(payload),
        };
        let stop_pending = directive.eq_ignore_ascii_case("STOP_BACKEND");
        self.route_to_backend(caller, backend, directive, line, rewrite, stop_pending, actions);
    }

    /// Binds the caller to the backend and forwards the rewritten directive.
    ///
    /// The busy check runs first, then the wire rewrite, then the binding; a rewrite error
    /// leaves both parties unbound.
    #[allow(clippy::too_many_arguments)]
    fn route_to_backend(
        &mut self,
        caller: Handle,
        backend: Handle,
        directive: &str,
        echo: &str,
        rewrite: WireRewrite<'_>,
        stop_pending: bool,
        actions: &mut Vec<EngineAction>,
    ) {
        let backend_binding = self
            .table
            .get(backend)
            .map_or(Binding::None, |connection| connection.bound_to);
        let mut displaced = None;
        match backend_binding {
            Binding::None => {}
            Binding::Peer(other) if other == caller => {
                // Drain deferral keeps this from happening; refuse rather than double-bind.
                warn!(caller, backend, "caller already bound to this backend");
                return;
            }
            Binding::Peer(other) => {
                let other_expected = self
                    .table
                    .get(other)
                    .and_then(|connection| connection.expected_directive.clone());
                let repeat_in_flight = other_expected
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case("SEND_START"));
                if directive.eq_ignore_ascii_case("SEND_STOP") && repeat_in_flight {
                    // SEND_STOP overrides a repeat no matter who started it.
                    debug!(backend, other, "SEND_STOP displacing in-flight repeat");
                    self.table.unbind(backend);
                    actions.push(EngineAction::Send {
                        handle: other,
                        bytes: error_frame(
                            &other_expected.unwrap_or_default(),
                            "repeating stopped by SEND_STOP",
                        ),
                    });
                    displaced = Some(other);
                } else if directive.eq_ignore_ascii_case("SEND_START") && repeat_in_flight {
                    actions.push(EngineAction::Send {
                        handle: caller,
                        bytes: error_frame(echo, "busy: repeating"),
                    });
                    return;
                } else {
                    actions.push(EngineAction::Send {
                        handle: caller,
                        bytes: error_frame(echo, "busy: already in command"),
                    });
                    return;
                }
            }
            Binding::Local => {
                actions.push(EngineAction::Send {
                    handle: caller,
                    bytes: error_frame(echo, "busy: already in command"),
                });
                return;
            }
        }

        let wire = match rewrite {
            WireRewrite::Verbatim(full_line) => format!("{full_line}\n"),
            WireRewrite::BackendOnly => format!("{directive}\n"),
            WireRewrite::BackendWithArg(payload) => format!("{directive} {payload}\n"),
            WireRewrite::Simulate(payload) => {
                if !self.config.allow_simulate {
                    actions.push(EngineAction::Send {
                        handle: caller,
                        bytes: error_frame(echo, "SIMULATE command is disabled"),
                    });
                    return;
                }
                let Some(key) = SimulateKey::parse(payload) else {
                    actions.push(EngineAction::Send {
                        handle: caller,
                        bytes: error_frame(echo, &format!("Cannot parse input: {payload}")),
                    });
                    return;
                };
                format!("{directive} {}\n", key.to_wire())
            }
        };

        if let Some(connection) = self.table.get_mut(caller) {
            connection.expected_directive = Some(directive.to_owned());
        }
        self.table
            .bind(caller, backend, self.config.command_timeout_ticks);
        if let Some(connection) = self.table.get_mut(backend) {
            if let Some(parser) = connection.reply_parser.as_mut() {
                parser.reset();
            }
            connection.stop_pending = stop_pending;
        }
        trace!(caller, backend, wire = wire.trim_end(), "forwarding directive");
        actions.push(EngineAction::Send {
            handle: backend,
            bytes: wire.into_bytes(),
        });
        if let Some(other) = displaced {
            self.drain_lines(other, actions);
        }
    }

    /// Replies from a backend are consumed locally or routed to the bound caller.
    fn handle_backend_line(
        &mut self,
        backend: Handle,
        line: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        let (bound, completed, state) = {
            let Some(connection) = self.table.get_mut(backend) else {
                return;
            };
            let bound = connection.bound_to;
            match connection.reply_parser.as_mut() {
                Some(parser) => {
                    parser.feed(line);
                    (bound, parser.is_completed(), parser.state())
                }
                None => (bound, false, ParserState::Begin),
            }
        };
        match bound {
            Binding::Local => {
                if completed {
                    self.finish_local_reply(backend, actions);
                }
            }
            Binding::None => {
                error!(backend, line, "unexpected reply from backend, discarding");
                if completed {
                    self.reset_reply_parser(backend);
                }
            }
            Binding::Peer(caller) => {
                actions.push(EngineAction::Send {
                    handle: caller,
                    bytes: format!("{line}\n").into_bytes(),
                });
                if line.starts_with("END") {
                    self.finish_forwarded_reply(backend, caller, actions);
                } else if state == ParserState::BadData {
                    warn!(backend, line, "unparsable backend reply, disconnecting binding");
                    self.table.unbind(backend);
                    self.clear_stop_pending(backend);
                    self.reset_reply_parser(backend);
                    self.drain_lines(caller, actions);
                }
            }
        }
    }

    fn finish_forwarded_reply(
        &mut self,
        backend: Handle,
        caller: Handle,
        actions: &mut Vec<EngineAction>,
    ) {
        let stop_pending = self
            .table
            .get(backend)
            .is_some_and(|connection| connection.stop_pending);
        self.table.unbind(backend);
        self.reset_reply_parser(backend);
        if stop_pending {
            debug!(backend, "backend stopped on request");
            self.remove_backend_pair(backend, actions);
        }
        self.drain_lines(caller, actions);
    }

    /// Registration handshake replies, consumed by the dispatcher itself.
    fn finish_local_reply(&mut self, backend: Handle, actions: &mut Vec<EngineAction>) {
        let (outcome, command, first_payload_line, last_line) = {
            let Some(parser) = self
                .table
                .get(backend)
                .and_then(|connection| connection.reply_parser.as_ref())
            else {
                return;
            };
            (
                parser.outcome(),
                parser.command().to_ascii_uppercase(),
                parser.payload().first().cloned(),
                parser.last_line().to_owned(),
            )
        };
        if outcome != ReplyOutcome::Ok {
            error!(backend, last_line = %last_line, "backend registration reply failed, dropping backend");
            self.remove_backend_pair(backend, actions);
            return;
        }
        match command.as_str() {
            // The hyphenated spellings come from the older registration protocol.
            GET_BACKEND_INFO_CMD | "GET-ID" => {
                self.finish_info_reply(backend, first_payload_line, actions);
            }
            SET_DATA_SOCKET_CMD | "SET-DATA-SOCKET" => {
                self.finish_data_socket_reply(backend, actions);
            }
            other => {
                warn!(backend, command = other, "unknown backend reply");
                self.reset_reply_parser(backend);
            }
        }
    }

    fn finish_info_reply(
        &mut self,
        backend: Handle,
        payload: Option<String>,
        actions: &mut Vec<EngineAction>,
    ) {
        let parsed = payload.as_deref().and_then(parse_backend_info);
        let Some((backend_type, pid, identity)) = parsed else {
            error!(backend, ?payload, "cannot register backend, malformed info reply");
            self.remove_backend_pair(backend, actions);
            return;
        };
        debug!(backend, backend_type = %backend_type, pid, identity = %identity, "backend identified");
        let fifo_path = {
            let Some(connection) = self.table.get_mut(backend) else {
                return;
            };
            connection.identity = Some(identity);
            connection.backend_pid = Some(pid);
            if let Some(parser) = connection.reply_parser.as_mut() {
                parser.reset();
            }
            connection.fifo_path.clone().unwrap_or_default()
        };
        actions.push(EngineAction::Send {
            handle: backend,
            bytes: format!("{SET_DATA_SOCKET_CMD} {}\n", fifo_path.display()).into_bytes(),
        });
    }

    fn finish_data_socket_reply(&mut self, backend: Handle, actions: &mut Vec<EngineAction>) {
        self.registration_seq += 1;
        let sequence = self.registration_seq;
        let (identity, fifo_path) = {
            let Some(connection) = self.table.get_mut(backend) else {
                return;
            };
            connection.registered_at = Some(sequence);
            connection.bound_to = Binding::None;
            if let Some(parser) = connection.reply_parser.as_mut() {
                parser.reset();
            }
            (connection.identity.clone(), connection.fifo_path.take())
        };
        self.table.set_default_backend(Some(backend));
        if let Some(path) = fifo_path {
            debug!(backend, path = %path.display(), "releasing fifo name");
            actions.push(EngineAction::ReleaseFifo { path });
        }
        info!(backend, identity = identity.as_deref().unwrap_or("?"), "backend registered");
    }

    /// Decoded events from a backend data channel reach every unbound client.
    fn handle_event_line(
        &mut self,
        data_handle: Handle,
        line: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        trace!(data_handle, line, "broadcasting decoded event");
        if let Some(log) = self.input_log.as_mut()
            && writeln!(log, "{line}").is_err()
        {
            warn!("cannot append to input log, disabling it");
            self.input_log = None;
        }
        let message = format!("{line}\n").into_bytes();
        for client in self.table.broadcast_targets() {
            actions.push(EngineAction::Send {
                handle: client,
                bytes: message.clone(),
            });
        }
    }

    fn remove_any(&mut self, handle: Handle, actions: &mut Vec<EngineAction>) {
        let Some(kind) = self.table.get(handle).map(|connection| connection.kind) else {
            return;
        };
        match kind {
            ConnKind::ClientStream | ConnKind::ControlStream => {
                self.remove_stream(handle, actions);
            }
            ConnKind::BackendCmd | ConnKind::BackendData => {
                self.remove_backend_pair(handle, actions);
            }
            other => warn!(handle, kind = ?other, "refusing to remove listener handle"),
        }
    }

    fn remove_stream(&mut self, handle: Handle, actions: &mut Vec<EngineAction>) {
        // The backend may still complete its reply; it then arrives unbound and is dropped.
        self.table.unbind(handle);
        if self.table.remove(handle).is_some() {
            info!(handle, "removed client");
            actions.push(EngineAction::Close { handle });
        }
    }

    fn remove_backend_pair(&mut self, handle: Handle, actions: &mut Vec<EngineAction>) {
        let Some(cmd) = self.table.backend_cmd_of(handle) else {
            if self.table.remove(handle).is_some() {
                actions.push(EngineAction::Close { handle });
            }
            return;
        };
        let mut displaced_caller = None;
        if let Some(Binding::Peer(caller)) = self.table.get(cmd).map(|c| c.bound_to) {
            let expected = self.expected_directive_of(caller);
            self.table.unbind(cmd);
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(&expected, "Backend unavailable"),
            });
            displaced_caller = Some(caller);
        }
        let was_default = self.table.default_backend() == Some(cmd);
        for connection in self.table.remove_backend_pair(cmd) {
            info!(handle = connection.handle, kind = ?connection.kind, "removed backend channel");
            if let Some(path) = connection.fifo_path {
                actions.push(EngineAction::ReleaseFifo { path });
            }
            actions.push(EngineAction::Close {
                handle: connection.handle,
            });
        }
        if was_default {
            let next = self.table.most_recent_registered();
            self.table.set_default_backend(next);
            debug!(new_default = ?next, "default backend replaced");
        }
        if let Some(caller) = displaced_caller {
            self.drain_lines(caller, actions);
        }
    }

    fn expected_directive_of(&self, handle: Handle) -> String {
        self.table
            .get(handle)
            .and_then(|connection| connection.expected_directive.clone())
            .unwrap_or_default()
    }

    fn reset_reply_parser(&mut self, backend: Handle) {
        if let Some(parser) = self
            .table
            .get_mut(backend)
            .and_then(|connection| connection.reply_parser.as_mut())
        {
            parser.reset();
        }
    }

    fn clear_stop_pending(&mut self, backend: Handle) {
        if let Some(connection) = self.table.get_mut(backend) {
            connection.stop_pending = false;
        }
    }
}

fn parse_backend_info(payload: &str) -> Option<(String, u32, String)> {
    let fields: Vec<&str> = payload.split_whitespace().collect();
    let [backend_type, pid, name, device] = fields.as_slice() else {
        return None;
    };
    let pid = pid.parse::<u32>().ok()?;
    Some(((*backend_type).to_owned(), pid, format!("{name}@{device}")))
}

/// Dispatcher-local control directive handlers.
pub(crate) mod handlers_local {
    use std::fs::File;

    use lircd_common::ids::Handle;
    use lircd_proto::frame::{error_frame, split_directive, success_data_frame, success_frame};
    use tracing::{debug, warn};

    use super::{BrokerEngine, EngineAction};

    pub(crate) fn handle_list_backends(
        engine: &mut BrokerEngine,
        caller: Handle,
        line: &str,
        _args: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        let identities: Vec<String> = engine
            .table
            .registered_backends()
            .into_iter()
            .filter_map(|handle| engine.table.get(handle))
            .filter_map(|connection| connection.identity.clone())
            .collect();
        actions.push(EngineAction::Send {
            handle: caller,
            bytes: success_data_frame(line, &identities),
        });
    }

    pub(crate) fn handle_get_default_backend(
        engine: &mut BrokerEngine,
        caller: Handle,
        line: &str,
        _args: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        debug!(caller, "sending default backend");
        let identity = engine
            .table
            .default_backend()
            .and_then(|handle| engine.table.get(handle))
            .and_then(|connection| connection.identity.clone());
        let bytes = match identity {
            Some(identity) => success_data_frame(line, &[identity]),
            None => error_frame(line, "None"),
        };
        actions.push(EngineAction::Send {
            handle: caller,
            bytes,
        });
    }

    pub(crate) fn handle_set_default_backend(
        engine: &mut BrokerEngine,
        caller: Handle,
        line: &str,
        args: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        let name = args.trim();
        let bytes = match engine.table.find_backend_by_identity(name) {
            Some(backend) => {
                engine.table.set_default_backend(Some(backend));
                success_frame(line)
            }
            None => {
                warn!(name, "set default backend: no such backend");
                error_frame(line, &format!("No such backend: {name}"))
            }
        };
        actions.push(EngineAction::Send {
            handle: caller,
            bytes,
        });
    }

    pub(crate) fn handle_version(
        _engine: &mut BrokerEngine,
        caller: Handle,
        line: &str,
        _args: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        actions.push(EngineAction::Send {
            handle: caller,
            bytes: success_data_frame(line, &[env!("CARGO_PKG_VERSION").to_owned()]),
        });
    }

    pub(crate) fn handle_set_inputlog(
        engine: &mut BrokerEngine,
        caller: Handle,
        line: &str,
        args: &str,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some((target, _rest)) = split_directive(args) else {
            actions.push(EngineAction::Send {
                handle: caller,
                bytes: error_frame(line, &format!("Illegal argument (protocol error): {args}")),
            });
            return;
        };
        let bytes = if target.eq_ignore_ascii_case("null") {
            engine.input_log = None;
            success_frame(line)
        } else {
            match File::create(target) {
                Ok(file) => {
                    engine.input_log = Some(file);
                    success_frame(line)
                }
                Err(error) => {
                    warn!(path = target, %error, "cannot open input logfile");
                    error_frame(line, &format!("Cannot open input logfile: {target}"))
                }
            }
        };
        actions.push(EngineAction::Send {
            handle: caller,
            bytes,
        });
    }
}
