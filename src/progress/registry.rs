use super::ProgressError;

/// Prefix for bars created by entrypoint invocation.
pub const ENTRYPOINT_PREFIX: &str = "entrypoint:";

/// Prefix for bars created by other mods through the API.
pub const CUSTOM_PREFIX: &str = "custom:";

pub fn entrypoint_bar_id(name: &str) -> String {
    format!("{ENTRYPOINT_PREFIX}{name}")
}

pub fn custom_bar_id(id: &str) -> String {
    format!("{CUSTOM_PREFIX}{id}")
}

/// A single progress bar. `minimum <= current <= maximum` holds at all times; every mutator
/// either preserves it or refuses to change anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressBar {
    id: String,
    minimum: i32,
    maximum: i32,
    current: i32,
    title: String,
    indeterminate: bool,
    closed: bool,
}

impl ProgressBar {
    /// Creates a bar spanning `[0, maximum]`. A negative maximum is raised to zero so that the
    /// bounds are never inverted.
    pub fn new(id: impl Into<String>, title: impl Into<String>, maximum: i32) -> ProgressBar {
        ProgressBar {
            id: id.into(),
            minimum: 0,
            maximum: maximum.max(0),
            current: 0,
            title: title.into(),
            indeterminate: false,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn minimum(&self) -> i32 {
        self.minimum
    }

    pub fn maximum(&self) -> i32 {
        self.maximum
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_indeterminate(&self) -> bool {
        self.indeterminate
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Sets the value, clamped into the bar's bounds. Returns the value actually stored.
    pub fn set_current(&mut self, value: i32) -> i32 {
        self.current = value.clamp(self.minimum, self.maximum);
        self.current
    }

    /// Moves the bar forward by one step, stopping at the maximum.
    pub fn step(&mut self) -> i32 {
        self.set_current(self.current.saturating_add(1))
    }

    pub fn set_minimum(&mut self, minimum: i32) -> Result<(), ProgressError> {
        if minimum > self.maximum {
            return Err(ProgressError::InvalidBounds {
                minimum,
                maximum: self.maximum,
            });
        }

        self.minimum = minimum;
        self.current = self.current.max(minimum);
        Ok(())
    }

    pub fn set_maximum(&mut self, maximum: i32) -> Result<(), ProgressError> {
        if maximum < self.minimum {
            return Err(ProgressError::InvalidBounds {
                minimum: self.minimum,
                maximum,
            });
        }

        self.maximum = maximum;
        self.current = self.current.min(maximum);
        Ok(())
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_indeterminate(&mut self, indeterminate: bool) {
        self.indeterminate = indeterminate;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// The set of bars currently on screen, in display order.
///
/// There are only ever a handful of bars at once (one per entrypoint type being invoked plus
/// whatever custom bars mods create), so a vector with linear lookups keeps insertion order
/// without any extra machinery.
#[derive(Debug, Default, Clone)]
pub struct ProgressRegistry {
    bars: Vec<ProgressBar>,
}

impl ProgressRegistry {
    pub fn new() -> ProgressRegistry {
        ProgressRegistry::default()
    }

    /// Adds a bar. If a bar with the same id exists it is replaced in its current position.
    pub fn insert(&mut self, bar: ProgressBar) {
        match self.bars.iter_mut().find(|existing| existing.id == bar.id) {
            Some(existing) => *existing = bar,
            None => self.bars.push(bar),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProgressBar> {
        self.bars.iter().find(|bar| bar.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ProgressBar> {
        self.bars.iter_mut().find(|bar| bar.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Removes a bar, marking the returned value as closed.
    pub fn remove(&mut self, id: &str) -> Option<ProgressBar> {
        let index = self.bars.iter().position(|bar| bar.id == id)?;
        let mut bar = self.bars.remove(index);
        bar.close();
        Some(bar)
    }

    pub fn ids(&self) -> Vec<String> {
        self.bars.iter().map(|bar| bar.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProgressBar> {
        self.bars.iter()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }
}
