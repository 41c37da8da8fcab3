use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::progress::{CustomOp, LoadingScreen, ProgressError};

/// Every custom bar handed out and not yet closed, by id.
pub type BarTable = Arc<Mutex<HashMap<String, CustomProgressBar>>>;

struct BarState {
    title: String,
    progress: i32,
    minimum: i32,
    maximum: i32,
}

struct Shared {
    id: String,
    screen: Option<Arc<LoadingScreen>>,
    table: Weak<Mutex<HashMap<String, CustomProgressBar>>>,
    state: Mutex<BarState>,
}

/// A mod's own progress bar. Handles are cheap to clone; every clone refers to the same bar.
///
/// If the loading screen isn't running the handle still works, it just doesn't show anything.
#[derive(Clone)]
pub struct CustomProgressBar {
    shared: Arc<Shared>,
}

impl CustomProgressBar {
    pub(super) fn new(
        id: &str,
        title: &str,
        maximum: i32,
        screen: Option<Arc<LoadingScreen>>,
        table: &BarTable,
    ) -> CustomProgressBar {
        CustomProgressBar {
            shared: Arc::new(Shared {
                id: id.to_string(),
                screen,
                table: Arc::downgrade(table),
                state: Mutex::new(BarState {
                    title: title.to_string(),
                    progress: 0,
                    minimum: 0,
                    maximum,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Whether the bar can actually appear on a loading screen.
    pub fn is_real(&self) -> bool {
        self.shared.screen.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .table
            .upgrade()
            .map_or(true, |table| !table.lock().contains_key(&self.shared.id))
    }

    fn check_closed(&self) -> Result<(), ProgressError> {
        if self.is_closed() {
            Err(ProgressError::Closed(self.shared.id.clone()))
        } else {
            Ok(())
        }
    }

    fn send(&self, op: CustomOp) -> Result<(), ProgressError> {
        match &self.shared.screen {
            Some(screen) => screen.custom_progress_bar_op(&self.shared.id, op),
            None => Ok(()),
        }
    }

    pub fn title(&self) -> String {
        self.shared.state.lock().title.clone()
    }

    pub fn progress(&self) -> i32 {
        self.shared.state.lock().progress
    }

    pub fn minimum(&self) -> i32 {
        self.shared.state.lock().minimum
    }

    pub fn maximum(&self) -> i32 {
        self.shared.state.lock().maximum
    }

    /// Sets the progress, clamped into `[minimum, maximum]`.
    pub fn set_progress(&self, progress: i32) -> Result<(), ProgressError> {
        self.check_closed()?;

        let progress = {
            let mut state = self.shared.state.lock();
            state.progress = progress.clamp(state.minimum, state.maximum);
            state.progress
        };

        self.send(CustomOp::Progress(progress))
    }

    /// Moves forward one step. Returns the new (clamped) progress.
    pub fn step(&self) -> Result<i32, ProgressError> {
        self.step_by(1)
    }

    pub fn step_by(&self, steps: i32) -> Result<i32, ProgressError> {
        self.set_progress(self.progress().saturating_add(steps))?;
        Ok(self.progress())
    }

    pub fn set_minimum(&self, minimum: i32) -> Result<(), ProgressError> {
        let maximum = self.maximum();

        if minimum > maximum {
            return Err(ProgressError::InvalidBounds { minimum, maximum });
        }

        self.check_closed()?;

        {
            let mut state = self.shared.state.lock();
            state.minimum = minimum;
            state.progress = state.progress.max(minimum);
        }

        self.send(CustomOp::Minimum(minimum))
    }

    pub fn set_maximum(&self, maximum: i32) -> Result<(), ProgressError> {
        let minimum = self.minimum();

        if maximum < minimum {
            return Err(ProgressError::InvalidBounds { minimum, maximum });
        }

        self.check_closed()?;

        {
            let mut state = self.shared.state.lock();
            state.maximum = maximum;
            state.progress = state.progress.min(maximum);
        }

        self.send(CustomOp::Maximum(maximum))
    }

    pub fn set_title(&self, title: &str) -> Result<(), ProgressError> {
        self.check_closed()?;
        self.shared.state.lock().title = title.to_string();
        self.send(CustomOp::Title(title.to_string()))
    }

    /// Switches between a normal bar and a busy indicator.
    pub fn set_indeterminate(&self, indeterminate: bool) -> Result<(), ProgressError> {
        self.check_closed()?;
        self.send(CustomOp::Indeterminate(indeterminate))
    }

    /// Removes the bar from the loading screen. Closing a handle that has since been replaced
    /// by a newer bar with the same id does nothing.
    pub fn close(&self) {
        let Some(table) = self.shared.table.upgrade() else {
            return;
        };

        let removed = {
            let mut table = table.lock();

            let is_current = table
                .get(&self.shared.id)
                .map_or(false, |current| current.same_bar(self));

            if is_current {
                table.remove(&self.shared.id)
            } else {
                None
            }
        };

        if removed.is_some() {
            if let Err(err) = self.send(CustomOp::Close) {
                log::warn!("Failed to close custom bar '{}': {err}", self.shared.id);
            }
        }
    }

    pub fn same_bar(&self, other: &CustomProgressBar) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for CustomProgressBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();

        f.debug_struct("CustomProgressBar")
            .field("id", &self.shared.id)
            .field("title", &state.title)
            .field("progress", &state.progress)
            .field("minimum", &state.minimum)
            .field("maximum", &state.maximum)
            .finish()
    }
}
