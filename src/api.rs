//! The API other mods use to talk to the loading screen. Every call works whether or not the
//! loading screen is running; when it isn't, queries return neutral answers and bars are
//! invisible.

mod compat;
mod custom;
mod features;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

pub use compat::{invoke_entrypoint, normalize as normalize_invoke_error};
pub use custom::{BarTable, CustomProgressBar};
pub use features::{Feature, Features};

use crate::{
    context,
    host::detect_headless,
    progress::{FinalEntrypoints, LoadingScreen, ProgressError},
};

static CUSTOM_BARS: Lazy<BarTable> = Lazy::new(BarTable::default);

/// A view of the loading screen for API callers.
pub struct Api {
    screen: Option<Arc<LoadingScreen>>,
    bars: BarTable,
}

impl Api {
    pub fn new(screen: Option<Arc<LoadingScreen>>, bars: BarTable) -> Api {
        Api { screen, bars }
    }

    /// The API for this process's loading screen, if it has one.
    pub fn current() -> Api {
        Api::new(context::get(), CUSTOM_BARS.clone())
    }

    /// Whether a real implementation is behind this API.
    pub fn is_available(&self) -> bool {
        self.screen.is_some()
    }

    pub fn features(&self) -> Features {
        if self.is_available() {
            Features::V1_0_4
        } else {
            Features::NONE
        }
    }

    /// Whether any of `requested` is available.
    pub fn has_features(&self, requested: Features) -> bool {
        self.features().has_features(requested)
    }

    /// The entrypoint names whose completion closes the loading screen. Changes are seen by the
    /// teardown policy. Without a loading screen this is an empty set nobody else sees.
    pub fn final_entrypoints(&self) -> FinalEntrypoints {
        match &self.screen {
            Some(screen) => screen.final_entrypoints(),
            None => FinalEntrypoints::default(),
        }
    }

    pub fn is_headless(&self) -> bool {
        match &self.screen {
            Some(screen) => screen.host().is_headless(),
            None => detect_headless(),
        }
    }

    /// Whether the loading screen is drawn by a separate process.
    pub fn is_using_ipc(&self) -> bool {
        self.screen
            .as_ref()
            .map_or(false, |screen| screen.role().uses_ipc())
    }

    pub fn is_open(&self) -> bool {
        self.screen.as_ref().map_or(false, |screen| screen.is_open())
    }

    /// The progress of a bar by its full name, such as `entrypoint:main` or `custom:worldgen`.
    pub fn progress(&self, bar: &str) -> Option<i32> {
        self.screen.as_ref().and_then(|screen| screen.progress(bar))
    }

    pub fn active_progress_bars(&self) -> Vec<String> {
        self.screen
            .as_ref()
            .map(|screen| screen.active_bars())
            .unwrap_or_default()
    }

    /// Gets the custom bar `id`, creating it if needed. The title and maximum are applied either
    /// way. A maximum below the bar's minimum is rejected before anything changes.
    pub fn custom_progress_bar(
        &self,
        id: &str,
        title: &str,
        max: i32,
    ) -> Result<CustomProgressBar, ProgressError> {
        let mut bars = self.bars.lock();

        if let Some(bar) = bars.get(id) {
            let bar = bar.clone();
            drop(bars);

            bar.set_maximum(max)?;
            bar.set_title(title)?;
            return Ok(bar);
        }

        if max < 0 {
            return Err(ProgressError::InvalidBounds {
                minimum: 0,
                maximum: max,
            });
        }

        if let Some(screen) = &self.screen {
            screen.create_custom_progress_bar(id, title, max)?;
        }

        let bar = CustomProgressBar::new(id, title, max, self.screen.clone(), &self.bars);
        bars.insert(id.to_string(), bar.clone());

        Ok(bar)
    }
}

impl Default for Api {
    fn default() -> Self {
        Api::new(None, Arc::new(Mutex::new(HashMap::new())))
    }
}
