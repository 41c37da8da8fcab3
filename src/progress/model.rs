use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use lazy_static::lazy_static;
use parking_lot::Mutex;

use super::{
    custom_bar_id, entrypoint_bar_id, CustomOp, Delivery, DeferRule, EventSink,
    FinalEntrypoints, OverlayState, ProgressBar, ProgressError, ProgressEvent, ProgressRegistry,
    TeardownPolicy,
};
use crate::{
    config::Role,
    host::{Host, LoaderVariant},
    hooks::simple_class_name,
    memory::{MemorySampler, MemorySource},
};

lazy_static! {
    /// Builtin units that never name the game.
    static ref IGNORED_BUILTIN: [&'static str; 1] = ["java"];
}

/// What the game process does once the display process has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// The user closed the loading screen window, so they want the game gone too.
    Exit,

    /// Just take the overlay down and keep loading.
    Teardown,
}

/// The text of an entrypoint bar.
pub fn entrypoint_label(
    type_name: &str,
    type_type: &str,
    current: i32,
    maximum: i32,
    unit_name: Option<&str>,
) -> String {
    let mut label = format!("Loading '{type_name}' ({type_type}) \u{2014} {current}/{maximum}");

    if let Some(unit_name) = unit_name {
        label.push_str(" \u{2014} ");
        label.push_str(unit_name);
    }

    label
}

/// The title shown for a builtin unit, or `None` for units that don't name the game.
pub fn metadata_title(id: &str, name: &str, version: &str) -> Option<String> {
    if IGNORED_BUILTIN.contains(&id) {
        None
    } else {
        Some(format!("Loading {name} {version}"))
    }
}

struct ScreenState {
    registry: ProgressRegistry,
    overlay: OverlayState,
    title_set: bool,
    sink: Option<Box<dyn EventSink>>,
    disconnected: bool,
}

impl ScreenState {
    /// Hands an event to the sink if the overlay is up.
    fn notify(&mut self, event: ProgressEvent) {
        if !self.overlay.is_open() {
            return;
        }

        if let Some(sink) = self.sink.as_mut() {
            if sink.deliver(&event) == Delivery::Disconnected {
                self.disconnected = true;
            }
        }
    }
}

/// The progress model. One exists per process; the injected hooks, the public API and the IPC
/// client all talk to it.
pub struct LoadingScreen {
    role: Role,
    host: Arc<dyn Host>,
    disconnect_action: DisconnectAction,
    policy: Mutex<TeardownPolicy>,
    state: Mutex<ScreenState>,
    sampler: Mutex<Option<MemorySampler>>,
}

impl LoadingScreen {
    pub fn new(role: Role, host: Arc<dyn Host>) -> LoadingScreen {
        let policy = TeardownPolicy::new(host.variant());

        LoadingScreen {
            role,
            host,
            disconnect_action: DisconnectAction::Exit,
            policy: Mutex::new(policy),
            state: Mutex::new(ScreenState {
                registry: ProgressRegistry::new(),
                overlay: OverlayState::default(),
                title_set: false,
                sink: None,
                disconnected: false,
            }),
            sampler: Mutex::new(None),
        }
    }

    pub fn with_disconnect_action(mut self, action: DisconnectAction) -> LoadingScreen {
        self.disconnect_action = action;
        self
    }

    /// Connects the overlay (or the pipe to it) and marks the overlay as open. Fails if a sink
    /// is already attached or the overlay has been torn down.
    pub fn attach(&self, sink: Box<dyn EventSink>) -> bool {
        let mut state = self.state.lock();

        if state.sink.is_some() || !state.overlay.open() {
            return false;
        }

        state.sink = Some(sink);
        true
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn variant(&self) -> LoaderVariant {
        self.host.variant()
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().overlay.is_open()
    }

    pub fn title(&self) -> Option<String> {
        self.state.lock().overlay.title().map(str::to_string)
    }

    /// The current value of a bar, by its full id (`entrypoint:main`, `custom:foo`).
    pub fn progress(&self, id: &str) -> Option<i32> {
        self.state.lock().registry.get(id).map(ProgressBar::current)
    }

    pub fn active_bars(&self) -> Vec<String> {
        self.state.lock().registry.ids()
    }

    pub fn bar(&self, id: &str) -> Option<ProgressBar> {
        self.state.lock().registry.get(id).cloned()
    }

    pub fn final_entrypoints(&self) -> FinalEntrypoints {
        self.policy.lock().final_entrypoints().clone()
    }

    pub fn set_defer_rules(&self, rules: Vec<DeferRule>) {
        self.policy.lock().set_defer_rules(rules);
    }

    /// Runs `f` against the state, then deals with a lost display process once the lock is
    /// released.
    fn update<R>(&self, f: impl FnOnce(&mut ScreenState) -> R) -> R {
        let (result, disconnected) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.disconnected))
        };

        if disconnected {
            self.handle_disconnect();
        }

        result
    }

    fn handle_disconnect(&self) {
        match self.disconnect_action {
            DisconnectAction::Exit => {
                log::info!("Exiting process due to IPC exit");
                std::process::exit(0);
            }

            DisconnectAction::Teardown => {
                log::info!("Display process has gone away, closing the loading screen");
                self.close();
            }
        }
    }

    pub fn begin_entrypoint_type(&self, name: &str, type_name: &str, count: i32) {
        log::info!("Preparing loading screen for entrypoint '{name}'");

        self.update(|state| {
            if state.overlay.is_torn_down() {
                return;
            }

            let bar = ProgressBar::new(
                entrypoint_bar_id(name),
                entrypoint_label(name, type_name, 0, count.max(0), None),
                count,
            );

            state.registry.insert(bar);
            state.notify(ProgressEvent::BeginEntrypointType {
                name: name.to_string(),
                type_name: type_name.to_string(),
                count,
            });
        });
    }

    /// The form the injected hook calls: the count comes from the host, and the type is known
    /// only by its class name.
    pub fn begin_entrypoint_type_for_class(&self, name: &str, class_name: &str) {
        let count = self.host.entrypoint_count(name, Some(class_name));
        let count = i32::try_from(count).unwrap_or(i32::MAX);

        self.begin_entrypoint_type(name, simple_class_name(class_name), count);
    }

    pub fn begin_single_entrypoint(
        &self,
        type_name: &str,
        type_type: &str,
        unit_id: &str,
        unit_name: &str,
    ) {
        log::info!("Calling entrypoint container for mod '{unit_id}'");

        self.update(|state| {
            let Some(bar) = state.registry.get_mut(&entrypoint_bar_id(type_name)) else {
                return;
            };

            let current = bar.step();
            let label = entrypoint_label(
                type_name,
                type_type,
                current,
                bar.maximum(),
                Some(unit_name),
            );
            bar.set_title(label);

            state.notify(ProgressEvent::BeginSingleEntrypoint {
                type_name: type_name.to_string(),
                type_type: type_type.to_string(),
                unit_id: unit_id.to_string(),
                unit_name: unit_name.to_string(),
            });
        });
    }

    pub fn end_entrypoint_type(&self, name: &str) {
        log::info!("Finished loading screen for entrypoint '{name}'");

        self.update(|state| {
            if state.registry.remove(&entrypoint_bar_id(name)).is_none() {
                return;
            }

            state.notify(ProgressEvent::EndEntrypointType {
                name: name.to_string(),
            });
        });
    }

    /// Closes the overlay if `entrypoint` was the last thing it was waiting for. Returns whether
    /// this call closed it.
    pub fn maybe_close_after(&self, entrypoint: &str) -> bool {
        if !self.is_open() {
            return false;
        }

        // The host may be slow to answer, so the policy is consulted without any lock held.
        let policy = self.policy.lock().clone();

        if !policy.should_close(entrypoint, self.host.as_ref()) {
            return false;
        }

        self.close()
    }

    /// Creates a custom bar, or updates the title and maximum of the existing one with the
    /// same id. A maximum below the bar's minimum (zero for a new bar) is rejected and nothing
    /// changes.
    pub fn create_custom_progress_bar(
        &self,
        id: &str,
        title: &str,
        max: i32,
    ) -> Result<ProgressBar, ProgressError> {
        self.update(|state| {
            let full_id = custom_bar_id(id);

            let minimum = state
                .registry
                .get(&full_id)
                .map_or(0, ProgressBar::minimum);

            if max < minimum {
                return Err(ProgressError::InvalidBounds {
                    minimum,
                    maximum: max,
                });
            }

            if state.overlay.is_torn_down() {
                return Ok(ProgressBar::new(full_id, title, max));
            }

            let bar = match state.registry.get_mut(&full_id) {
                Some(bar) => {
                    bar.set_maximum(max)?;
                    bar.set_title(title);
                    bar.clone()
                }

                None => {
                    let bar = ProgressBar::new(full_id, title, max);
                    state.registry.insert(bar.clone());
                    bar
                }
            };

            state.notify(ProgressEvent::CreateCustomBar {
                id: id.to_string(),
                title: title.to_string(),
                max: bar.maximum(),
            });

            Ok(bar)
        })
    }

    /// Applies an operation to a custom bar. Operations on bars that don't exist are ignored.
    pub fn custom_progress_bar_op(&self, id: &str, op: CustomOp) -> Result<(), ProgressError> {
        self.update(|state| -> Result<(), ProgressError> {
            let full_id = custom_bar_id(id);

            let applied = match op {
                CustomOp::Close => {
                    if state.registry.remove(&full_id).is_none() {
                        return Ok(());
                    }

                    CustomOp::Close
                }

                op => {
                    let Some(bar) = state.registry.get_mut(&full_id) else {
                        return Ok(());
                    };

                    match op {
                        CustomOp::Progress(value) => CustomOp::Progress(bar.set_current(value)),

                        CustomOp::Minimum(value) => {
                            bar.set_minimum(value)?;
                            op
                        }

                        CustomOp::Maximum(value) => {
                            bar.set_maximum(value)?;
                            op
                        }

                        CustomOp::Title(ref title) => {
                            bar.set_title(title.as_str());
                            op
                        }

                        CustomOp::Indeterminate(on) => {
                            bar.set_indeterminate(on);
                            op
                        }

                        CustomOp::Close => op,
                    }
                }
            };

            state.notify(ProgressEvent::CustomBarOp {
                id: id.to_string(),
                op: applied,
            });

            Ok(())
        })
    }

    /// The string form used by the wire protocol.
    pub fn custom_progress_bar_op_named(
        &self,
        id: &str,
        op: &str,
        args: &[String],
    ) -> Result<(), ProgressError> {
        self.custom_progress_bar_op(id, CustomOp::parse(op, args)?)
    }

    /// Sets the window title from a builtin unit's metadata. Only the first unit to report
    /// counts. Returns whether the title was taken.
    pub fn set_title_from_metadata(&self, id: &str, name: &str, version: &str) -> bool {
        self.update(|state| {
            if state.title_set {
                return false;
            }

            let Some(title) = metadata_title(id, name, version) else {
                return false;
            };

            state.title_set = true;
            state.overlay.set_title(title.as_str());
            state.notify(ProgressEvent::SetTitle(title));
            true
        })
    }

    /// Takes the title from the host's builtin units, if any of them names the game.
    pub fn adopt_builtin_title(&self) -> bool {
        self.host
            .builtin_units()
            .iter()
            .any(|unit| self.set_title_from_metadata(&unit.id, &unit.name, &unit.version))
    }

    pub fn set_title(&self, title: &str) {
        self.update(|state| {
            state.overlay.set_title(title);
            state.notify(ProgressEvent::SetTitle(title.to_string()));
        });
    }

    pub fn update_memory_usage(&self, usage: u64, total: u64) {
        self.update(|state| state.notify(ProgressEvent::MemoryUsage { usage, total }));
    }

    /// Applies an event that arrived from the other process.
    pub fn apply(&self, event: ProgressEvent) -> Result<(), ProgressError> {
        match event {
            ProgressEvent::BeginEntrypointType {
                name,
                type_name,
                count,
            } => self.begin_entrypoint_type(&name, &type_name, count),

            ProgressEvent::BeginSingleEntrypoint {
                type_name,
                type_type,
                unit_id,
                unit_name,
            } => self.begin_single_entrypoint(&type_name, &type_type, &unit_id, &unit_name),

            ProgressEvent::EndEntrypointType { name } => self.end_entrypoint_type(&name),

            ProgressEvent::MemoryUsage { usage, total } => self.update_memory_usage(usage, total),

            ProgressEvent::CreateCustomBar { id, title, max } => {
                self.create_custom_progress_bar(&id, &title, max)?;
            }

            ProgressEvent::CustomBarOp { id, op } => self.custom_progress_bar_op(&id, op)?,

            ProgressEvent::SetTitle(title) => self.set_title(&title),

            ProgressEvent::Shutdown => {
                self.close();
            }
        }

        Ok(())
    }

    /// Starts feeding memory samples to the overlay. The display process never samples; its
    /// memory bar shows the game process's numbers.
    pub fn start_memory_sampler(
        self: &Arc<Self>,
        source: Box<dyn MemorySource>,
        period: Duration,
    ) -> bool {
        if self.role == Role::IpcClient || !self.is_open() {
            return false;
        }

        let screen: Weak<LoadingScreen> = Arc::downgrade(self);

        let sampler = match MemorySampler::spawn(period, source, move |sample| {
            let Some(screen) = screen.upgrade() else {
                return false;
            };

            screen.update_memory_usage(sample.used, sample.total);
            screen.is_open()
        }) {
            Ok(sampler) => sampler,
            Err(err) => {
                log::error!("Failed to start memory sampler: {err}");
                return false;
            }
        };

        let previous = self.sampler.lock().replace(sampler);

        if let Some(previous) = previous {
            previous.stop();
        }

        // A close that raced with the spawn won't have seen the new sampler.
        if !self.is_open() {
            let sampler = self.sampler.lock().take();

            if let Some(sampler) = sampler {
                sampler.stop();
            }
        }

        true
    }

    /// Tears the overlay down. Every resource is released exactly once no matter how many
    /// times this is called. Returns whether this call did the closing.
    pub fn close(&self) -> bool {
        let sampler = self.sampler.lock().take();

        if let Some(sampler) = sampler {
            sampler.stop();
        }

        let sink = {
            let mut state = self.state.lock();

            if !state.overlay.close() {
                return false;
            }

            state.registry.clear();
            state.disconnected = false;
            state.sink.take()
        };

        log::info!("Closing loading screen");

        if let Some(mut sink) = sink {
            // The other side may already be gone; there's nothing left to tell it either way.
            let _ = sink.deliver(&ProgressEvent::Shutdown);
            sink.close();
        }

        true
    }
}

impl Drop for LoadingScreen {
    fn drop(&mut self) {
        let sampler = self.sampler.get_mut().take();

        if let Some(sampler) = sampler {
            sampler.stop();
        }
    }
}
