//! Deciding when the overlay goes away.

use std::{collections::HashSet, sync::Arc};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::host::{Host, LoaderVariant};

lazy_static! {
    /// Entrypoints that are the last thing the game runs before its own window takes over.
    static ref DEFAULT_FINAL_ENTRYPOINTS: [&'static str; 4] =
        ["client", "server", "client_init", "server_init"];
}

/// Whether the overlay is showing, and what it's called.
#[derive(Debug, Default, Clone)]
pub struct OverlayState {
    open: bool,
    torn_down: bool,
    title: Option<String>,
}

impl OverlayState {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Marks the overlay as shown. Once it has been torn down it stays down, so this returns
    /// `false` after a close.
    pub fn open(&mut self) -> bool {
        if self.torn_down {
            return false;
        }

        self.open = true;
        true
    }

    /// Tears the overlay down. Returns `true` only for the call that actually closed it.
    pub fn close(&mut self) -> bool {
        if self.torn_down {
            return false;
        }

        self.open = false;
        self.torn_down = true;
        true
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }
}

/// The shared, mutable set of entrypoint names whose completion closes the overlay. Other mods
/// can add to or remove from this through the API.
#[derive(Debug, Clone, Default)]
pub struct FinalEntrypoints(Arc<Mutex<HashSet<String>>>);

impl FinalEntrypoints {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> FinalEntrypoints {
        FinalEntrypoints(Arc::new(Mutex::new(
            names.into_iter().map(Into::into).collect(),
        )))
    }

    pub fn insert(&self, name: impl Into<String>) -> bool {
        self.0.lock().insert(name.into())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.0.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.lock().contains(name)
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.0.lock().clone()
    }
}

/// A situation in which a final entrypoint finishing should *not* close the overlay, because
/// the loader is about to run a second, split-off entrypoint of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferRule {
    pub variant: LoaderVariant,

    /// The unit whose presence triggers the split initialisation.
    pub unit_id: String,

    /// Version predicate the unit must satisfy.
    pub predicate: String,

    /// Appended to the finishing entrypoint's name to get the counterpart that may still be
    /// pending.
    pub counterpart_suffix: String,
}

impl DeferRule {
    /// Quilt Standard Libraries from 5.0.0-beta.4 run `<type>_init` after `<type>`.
    pub fn quilt_split_init() -> DeferRule {
        DeferRule {
            variant: LoaderVariant::Quilt,
            unit_id: "quilt_base".to_string(),
            predicate: ">=5.0.0-beta.4".to_string(),
            counterpart_suffix: "_init".to_string(),
        }
    }

    fn applies(&self, variant: LoaderVariant, entrypoint: &str, host: &dyn Host) -> bool {
        self.variant == variant
            && host.unit_satisfies(&self.unit_id, &self.predicate)
            && host.entrypoint_count(&format!("{entrypoint}{}", self.counterpart_suffix), None) > 0
    }
}

/// The rules for `maybe_close_after`.
#[derive(Debug, Clone)]
pub struct TeardownPolicy {
    variant: LoaderVariant,
    final_entrypoints: FinalEntrypoints,
    defer_rules: Vec<DeferRule>,
}

impl TeardownPolicy {
    pub fn new(variant: LoaderVariant) -> TeardownPolicy {
        let final_entrypoints = FinalEntrypoints::new(DEFAULT_FINAL_ENTRYPOINTS.iter().copied());
        final_entrypoints.insert(variant.marker());

        TeardownPolicy {
            variant,
            final_entrypoints,
            defer_rules: vec![DeferRule::quilt_split_init()],
        }
    }

    pub fn final_entrypoints(&self) -> &FinalEntrypoints {
        &self.final_entrypoints
    }

    pub fn defer_rules(&self) -> &[DeferRule] {
        &self.defer_rules
    }

    pub fn set_defer_rules(&mut self, rules: Vec<DeferRule>) {
        self.defer_rules = rules;
    }

    /// Returns whether finishing `entrypoint` should close the overlay.
    pub fn should_close(&self, entrypoint: &str, host: &dyn Host) -> bool {
        if !self.final_entrypoints.contains(entrypoint) {
            return false;
        }

        if let Some(rule) = self
            .defer_rules
            .iter()
            .find(|rule| rule.applies(self.variant, entrypoint, host))
        {
            log::info!(
                "Not closing after '{entrypoint}': '{entrypoint}{}' is still to come",
                rule.counterpart_suffix
            );
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::FakeHost;

    #[test]
    fn overlay_close_is_terminal_and_idempotent() {
        let mut state = OverlayState::default();
        assert!(!state.is_open());
        assert!(state.open());
        assert!(state.close());
        assert!(!state.close());
        assert!(!state.open());
        assert!(!state.is_open());
    }

    #[test]
    fn default_set_includes_loader_marker() {
        let policy = TeardownPolicy::new(LoaderVariant::Quilt);
        let names = policy.final_entrypoints().snapshot();

        for name in ["client", "server", "client_init", "server_init", "quilt_loader"] {
            assert!(names.contains(name), "{name} missing");
        }
        assert!(!names.contains("fabricloader"));
    }

    #[test]
    fn only_final_entrypoints_close() {
        let host = FakeHost::fabric();
        let policy = TeardownPolicy::new(LoaderVariant::Fabric);

        assert!(policy.should_close("client", &host));
        assert!(!policy.should_close("main", &host));

        policy.final_entrypoints().insert("main");
        assert!(policy.should_close("main", &host));
    }

    #[test]
    fn quilt_split_init_defers_close() {
        let mut host = FakeHost::quilt();
        host.satisfied
            .push(("quilt_base".to_string(), ">=5.0.0-beta.4".to_string()));
        host.set_count("client_init", 2);

        let policy = TeardownPolicy::new(LoaderVariant::Quilt);
        assert!(!policy.should_close("client", &host));

        // Nothing left under the counterpart name, so the close goes ahead.
        host.set_count("client_init", 0);
        assert!(policy.should_close("client", &host));
    }

    #[test]
    fn defer_rules_are_variant_specific_and_replaceable() {
        let mut host = FakeHost::fabric();
        host.satisfied
            .push(("quilt_base".to_string(), ">=5.0.0-beta.4".to_string()));
        host.set_count("client_init", 2);

        let mut policy = TeardownPolicy::new(LoaderVariant::Fabric);
        assert!(policy.should_close("client", &host));

        policy.set_defer_rules(vec![DeferRule {
            variant: LoaderVariant::Fabric,
            ..DeferRule::quilt_split_init()
        }]);
        assert!(!policy.should_close("client", &host));
    }
}
