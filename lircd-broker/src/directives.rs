//! Directive tables for the two command endpoints.
//!
//! The legacy client endpoint accepts the classic directive set and forwards every directive to
//! the current default backend. The control endpoint resolves directives against its own table:
//! some are answered by the dispatcher, the rest are routed to a backend chosen by identity in
//! the first argument.

use std::collections::{BTreeMap, BTreeSet};

use lircd_common::ids::Handle;

use crate::engine::{BrokerEngine, EngineAction, handlers_local};

/// Handler signature for dispatcher-local control directives.
pub type LocalHandler = fn(&mut BrokerEngine, Handle, &str, &str, &mut Vec<EngineAction>);

/// Wire shape of a routed control directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedForm {
    /// Only the backend selector: the backend wire form is the bare directive.
    BackendOnly,
    /// Backend selector plus one argument forwarded verbatim.
    BackendWithArg,
    /// Backend selector plus a key event re-encoded into the backend argument order.
    Simulate,
}

/// Dispatch target of one control directive.
#[derive(Debug, Clone, Copy)]
pub enum ControlDispatch {
    /// Answered by the dispatcher itself.
    Local(LocalHandler),
    /// Routed to the backend named by the first argument.
    Routed(RoutedForm),
}

/// One control table entry.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveSpec {
    /// Canonical directive name.
    pub name: &'static str,
    /// Dispatch target.
    pub dispatch: ControlDispatch,
}

/// Control endpoint directive table.
#[derive(Debug, Default)]
pub struct ControlRegistry {
    entries: BTreeMap<String, DirectiveSpec>,
}

impl ControlRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry preloaded with the control directive set.
    #[must_use]
    pub fn with_builtin_directives() -> Self {
        let mut registry = Self::new();
        registry.register_local_directives();
        registry.register_routed_directives();
        registry
    }

    fn register_local_directives(&mut self) {
        self.register(DirectiveSpec {
            name: "LIST_BACKENDS",
            dispatch: ControlDispatch::Local(handlers_local::handle_list_backends),
        });
        self.register(DirectiveSpec {
            name: "GET_DEFAULT_BACKEND",
            dispatch: ControlDispatch::Local(handlers_local::handle_get_default_backend),
        });
        self.register(DirectiveSpec {
            name: "SET_DEFAULT_BACKEND",
            dispatch: ControlDispatch::Local(handlers_local::handle_set_default_backend),
        });
        self.register(DirectiveSpec {
            name: "VERSION",
            dispatch: ControlDispatch::Local(handlers_local::handle_version),
        });
        self.register(DirectiveSpec {
            name: "SET_INPUTLOG",
            dispatch: ControlDispatch::Local(handlers_local::handle_set_inputlog),
        });
        // Accepted for compatibility with the older hyphenated protocol spelling.
        self.register(DirectiveSpec {
            name: "SET-INPUTLOG",
            dispatch: ControlDispatch::Local(handlers_local::handle_set_inputlog),
        });
    }

    fn register_routed_directives(&mut self) {
        self.register(DirectiveSpec {
            name: "STOP_BACKEND",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendOnly),
        });
        self.register(DirectiveSpec {
            name: "LIST_REMOTES",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendOnly),
        });
        self.register(DirectiveSpec {
            name: "LIST_CODES",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendWithArg),
        });
        self.register(DirectiveSpec {
            name: "SEND_ONCE",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendWithArg),
        });
        self.register(DirectiveSpec {
            name: "SEND_START",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendWithArg),
        });
        self.register(DirectiveSpec {
            name: "SEND_STOP",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendWithArg),
        });
        self.register(DirectiveSpec {
            name: "SET_TRANSMITTERS",
            dispatch: ControlDispatch::Routed(RoutedForm::BackendWithArg),
        });
        self.register(DirectiveSpec {
            name: "SIMULATE",
            dispatch: ControlDispatch::Routed(RoutedForm::Simulate),
        });
    }

    /// Registers or replaces one directive in the table.
    pub fn register(&mut self, spec: DirectiveSpec) {
        self.entries.insert(spec.name.to_ascii_uppercase(), spec);
    }

    /// Resolves a directive name, case-insensitively.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&DirectiveSpec> {
        self.entries.get(&name.to_ascii_uppercase())
    }
}

/// Legacy client endpoint directive table.
///
/// Every member dispatches to the default backend, so the table is a bare name set used to
/// reject unknown directives before a backend ever sees them.
#[derive(Debug, Default)]
pub struct LegacyRegistry {
    names: BTreeSet<String>,
}

impl LegacyRegistry {
    /// Builds the registry preloaded with the legacy directive set.
    #[must_use]
    pub fn with_builtin_directives() -> Self {
        let mut registry = Self::default();
        for name in [
            "LIST",
            "SEND_ONCE",
            "SEND_START",
            "SEND_STOP",
            "SET_INPUTLOG",
            "DRV_OPTION",
            "VERSION",
            "SET_TRANSMITTERS",
            "GET_BACKEND_INFO",
            "SET_DATA_SOCKET",
        ] {
            registry.names.insert(name.to_owned());
        }
        registry
    }

    /// Reports whether a directive is part of the legacy set, case-insensitively.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlDispatch, ControlRegistry, LegacyRegistry, RoutedForm};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("STOP_BACKEND", RoutedForm::BackendOnly)]
    #[case("list_remotes", RoutedForm::BackendOnly)]
    #[case("SEND_ONCE", RoutedForm::BackendWithArg)]
    #[case("simulate", RoutedForm::Simulate)]
    fn control_lookup_is_case_insensitive(#[case] name: &str, #[case] expected: RoutedForm) {
        let registry = ControlRegistry::with_builtin_directives();
        let spec = registry.lookup(name).expect("directive is registered");
        let ControlDispatch::Routed(form) = spec.dispatch else {
            panic!("directive should be routed");
        };
        assert_that!(form, eq(expected));
    }

    #[rstest]
    fn hyphenated_inputlog_spelling_is_accepted() {
        let registry = ControlRegistry::with_builtin_directives();
        assert_that!(registry.lookup("SET-INPUTLOG").is_some(), eq(true));
        assert_that!(registry.lookup("SET_INPUTLOG").is_some(), eq(true));
    }

    #[rstest]
    fn unknown_control_directives_miss() {
        let registry = ControlRegistry::with_builtin_directives();
        assert_that!(registry.lookup("REBOOT").is_none(), eq(true));
    }

    #[rstest]
    #[case("LIST", true)]
    #[case("send_once", true)]
    #[case("LIST_BACKENDS", false)]
    #[case("STOP_BACKEND", false)]
    fn legacy_table_covers_only_the_classic_set(#[case] name: &str, #[case] expected: bool) {
        let registry = LegacyRegistry::with_builtin_directives();
        assert_that!(registry.contains(name), eq(expected));
    }
}
