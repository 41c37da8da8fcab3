//! Drives a window from progress events. Drawing is left to a [`Toolkit`]; the crate only
//! ships [`LogToolkit`], which writes what would be drawn to the log.

use std::path::{Path, PathBuf};

use eyre::Result;

use crate::{
    config::{find_image, Options, BACKGROUND_FORMATS, ICON_FORMATS},
    host::LoaderVariant,
    memory::{describe, to_megabytes},
    progress::{
        custom_bar_id, entrypoint_bar_id, entrypoint_label, CustomOp, Delivery, EventSink,
        ProgressEvent,
    },
};

/// How the window should look when it's first shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowOptions {
    pub title: String,
    pub icon: Option<PathBuf>,
    pub background: Option<PathBuf>,
    pub memory_bar: bool,
}

impl WindowOptions {
    /// Picks up override images from the config directory. Without a known title, the
    /// loader's own name is shown.
    pub fn new(
        variant: LoaderVariant,
        config_dir: &Path,
        options: &Options,
        title: Option<String>,
    ) -> WindowOptions {
        WindowOptions {
            title: title.unwrap_or_else(|| variant.default_title().to_string()),
            icon: find_image(config_dir, "icon", ICON_FORMATS),
            background: find_image(config_dir, "background", BACKGROUND_FORMATS),
            memory_bar: options.enable_memory_display,
        }
    }
}

/// Everything a toolkit needs to draw one bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarView {
    pub id: String,
    pub minimum: i32,
    pub maximum: i32,
    pub value: i32,
    pub text: String,
    pub indeterminate: bool,
}

impl BarView {
    fn new(id: String, maximum: i32, text: String) -> BarView {
        BarView {
            id,
            minimum: 0,
            maximum: maximum.max(0),
            value: 0,
            text,
            indeterminate: false,
        }
    }
}

/// A GUI library able to open the loading screen window.
pub trait Toolkit {
    fn show(&mut self, options: &WindowOptions) -> Result<Box<dyn Window>>;
}

/// An open loading screen window. New bars go above older ones.
pub trait Window: Send {
    fn add_bar(&mut self, bar: &BarView);
    fn update_bar(&mut self, bar: &BarView);
    fn remove_bar(&mut self, id: &str);
    fn set_title(&mut self, title: &str);

    /// Only called if the window was opened with a memory bar.
    fn set_memory(&mut self, used_mb: i32, total_mb: i32, text: &str);

    fn dispose(&mut self);
}

/// Turns progress events into window calls.
pub struct OverlayDriver {
    window: Option<Box<dyn Window>>,
    bars: Vec<BarView>,
    memory_bar: bool,
}

impl OverlayDriver {
    pub fn show(toolkit: &mut dyn Toolkit, options: &WindowOptions) -> Result<OverlayDriver> {
        let window = toolkit.show(options)?;

        Ok(OverlayDriver {
            window: Some(window),
            bars: vec![],
            memory_bar: options.memory_bar,
        })
    }

    pub fn is_shown(&self) -> bool {
        self.window.is_some()
    }

    fn bar_mut(&mut self, id: &str) -> Option<&mut BarView> {
        self.bars.iter_mut().find(|bar| bar.id == id)
    }

    fn add(&mut self, bar: BarView) {
        if let Some(window) = self.window.as_mut() {
            window.add_bar(&bar);
        }

        self.bars.push(bar);
    }

    fn remove(&mut self, id: &str) {
        let Some(index) = self.bars.iter().position(|bar| bar.id == id) else {
            return;
        };

        self.bars.remove(index);

        if let Some(window) = self.window.as_mut() {
            window.remove_bar(id);
        }
    }

    /// Applies `f` to a bar and redraws it. Nothing happens if the bar isn't there.
    fn edit(&mut self, id: &str, f: impl FnOnce(&mut BarView)) {
        let Some(bar) = self.bar_mut(id) else {
            return;
        };

        f(bar);
        let bar = bar.clone();

        if let Some(window) = self.window.as_mut() {
            window.update_bar(&bar);
        }
    }

    fn handle(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BeginEntrypointType {
                name,
                type_name,
                count,
            } => {
                let id = entrypoint_bar_id(name);
                self.remove(&id);

                let text = entrypoint_label(name, type_name, 0, (*count).max(0), None);
                self.add(BarView::new(id, *count, text));
            }

            ProgressEvent::BeginSingleEntrypoint {
                type_name,
                type_type,
                unit_name,
                ..
            } => self.edit(&entrypoint_bar_id(type_name), |bar| {
                bar.value = (bar.value + 1).min(bar.maximum);
                bar.text = entrypoint_label(
                    type_name,
                    type_type,
                    bar.value,
                    bar.maximum,
                    Some(unit_name.as_str()),
                );
            }),

            ProgressEvent::EndEntrypointType { name } => self.remove(&entrypoint_bar_id(name)),

            ProgressEvent::MemoryUsage { usage, total } => {
                if !self.memory_bar {
                    return;
                }

                if let Some(window) = self.window.as_mut() {
                    window.set_memory(
                        to_megabytes(*usage),
                        to_megabytes(*total),
                        &describe(*usage, *total),
                    );
                }
            }

            ProgressEvent::CreateCustomBar { id, title, max } => {
                let id = custom_bar_id(id);

                if self.bar_mut(&id).is_some() {
                    self.edit(&id, |bar| {
                        bar.text = title.clone();
                        bar.maximum = (*max).max(bar.minimum);
                        bar.value = bar.value.min(bar.maximum);
                    });
                } else {
                    self.add(BarView::new(id, *max, title.clone()));
                }
            }

            ProgressEvent::CustomBarOp { id, op } => {
                let id = custom_bar_id(id);

                match op {
                    CustomOp::Close => self.remove(&id),

                    CustomOp::Progress(value) => self.edit(&id, |bar| {
                        bar.value = (*value).clamp(bar.minimum, bar.maximum);
                    }),

                    CustomOp::Minimum(value) => self.edit(&id, |bar| {
                        bar.minimum = (*value).min(bar.maximum);
                        bar.value = bar.value.max(bar.minimum);
                    }),

                    CustomOp::Maximum(value) => self.edit(&id, |bar| {
                        bar.maximum = (*value).max(bar.minimum);
                        bar.value = bar.value.min(bar.maximum);
                    }),

                    CustomOp::Title(title) => self.edit(&id, |bar| bar.text = title.clone()),

                    CustomOp::Indeterminate(on) => {
                        self.edit(&id, |bar| bar.indeterminate = *on)
                    }
                }
            }

            ProgressEvent::SetTitle(title) => {
                if let Some(window) = self.window.as_mut() {
                    window.set_title(title);
                }
            }

            ProgressEvent::Shutdown => self.dispose(),
        }
    }

    fn dispose(&mut self) {
        if let Some(mut window) = self.window.take() {
            window.dispose();
        }

        self.bars.clear();
    }
}

impl EventSink for OverlayDriver {
    fn deliver(&mut self, event: &ProgressEvent) -> Delivery {
        if self.window.is_none() {
            return Delivery::Dropped;
        }

        self.handle(event);
        Delivery::Delivered
    }

    fn close(&mut self) {
        self.dispose();
    }
}

/// Draws the loading screen as log lines, for consoles and environments without a GUI
/// library.
#[derive(Debug, Default)]
pub struct LogToolkit;

impl Toolkit for LogToolkit {
    fn show(&mut self, options: &WindowOptions) -> Result<Box<dyn Window>> {
        log::info!("Opening loading screen");
        log::info!("{}", options.title);

        Ok(Box::new(LogWindow))
    }
}

struct LogWindow;

impl Window for LogWindow {
    fn add_bar(&mut self, bar: &BarView) {
        log::debug!("+ {}", bar.text);
    }

    fn update_bar(&mut self, bar: &BarView) {
        if bar.indeterminate {
            log::info!("{}", bar.text);
        } else {
            log::info!("{} ({}/{})", bar.text, bar.value, bar.maximum);
        }
    }

    fn remove_bar(&mut self, id: &str) {
        log::debug!("- {id}");
    }

    fn set_title(&mut self, title: &str) {
        log::info!("{title}");
    }

    fn set_memory(&mut self, _used_mb: i32, _total_mb: i32, text: &str) {
        log::trace!("Memory: {text}");
    }

    fn dispose(&mut self) {
        log::info!("Closing loading screen window");
    }
}
