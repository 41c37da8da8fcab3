//! The boundary to the modloader. Everything the loading screen needs to know about the game
//! and its mods comes through the [`Host`] trait; the loader itself is never touched directly.

use std::{any::Any, path::PathBuf, sync::Arc};

use cached::proc_macro::cached;
use thiserror::Error;

/// Which loader we're running inside. The two share most of their internals, but the names and
/// local variable layouts of the methods we patch differ slightly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderVariant {
    Fabric,
    Quilt,
}

impl LoaderVariant {
    /// The id of the loader's own pseudo-mod. Its entrypoint finishing means loading is done,
    /// so it's added to the final entrypoint set at startup.
    pub fn marker(self) -> &'static str {
        match self {
            LoaderVariant::Fabric => "fabricloader",
            LoaderVariant::Quilt => "quilt_loader",
        }
    }

    /// The window title used before any game metadata is known.
    pub fn default_title(self) -> &'static str {
        match self {
            LoaderVariant::Fabric => "Loading Fabric Loader",
            LoaderVariant::Quilt => "Loading Quilt Loader",
        }
    }

    pub fn is_quilt(self) -> bool {
        self == LoaderVariant::Quilt
    }
}

/// Metadata for a mod (a "unit") known to the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
}

impl UnitMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> UnitMetadata {
        UnitMetadata {
            id: id.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// One registered implementation of an entrypoint, as handed to an invoker.
pub struct EntrypointContainer {
    pub provider: UnitMetadata,
    pub entrypoint: Arc<dyn Any + Send + Sync>,
}

/// The shapes of failure that entrypoint invocation can produce.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The loader's canonical error: one or more implementations of `key` failed.
    #[error("could not execute entrypoint stage '{key}' due to errors")]
    Entrypoint {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An error type the loader didn't convert into its canonical shape. `class_chain` lists
    /// the error's type and its supertypes, most specific first.
    #[error("{message}")]
    Foreign {
        class_chain: Vec<String>,
        key: Option<String>,
        message: String,
    },
}

/// Queries and actions provided by the modloader.
pub trait Host: Send + Sync {
    fn variant(&self) -> LoaderVariant;

    /// The number of implementations registered for an entrypoint. `type_name` narrows the
    /// count to implementations of that class when the loader can tell.
    fn entrypoint_count(&self, name: &str, type_name: Option<&str>) -> usize;

    /// Metadata of the builtin units (the game itself, the JVM, the loader).
    fn builtin_units(&self) -> Vec<UnitMetadata>;

    /// Tests the version of unit `id` against a loader-syntax version predicate such as
    /// `>=5.0.0-beta.4`. Returns `false` if the unit isn't loaded.
    fn unit_satisfies(&self, id: &str, predicate: &str) -> bool;

    fn is_headless(&self) -> bool {
        detect_headless()
    }

    fn game_dir(&self) -> PathBuf;

    fn config_dir(&self) -> PathBuf {
        self.game_dir().join("config")
    }

    fn invoke_entrypoints(
        &self,
        name: &str,
        type_name: &str,
        invoker: &mut dyn FnMut(&EntrypointContainer) -> eyre::Result<()>,
    ) -> Result<(), InvokeError>;
}

/// Works out whether a display is available to this process.
#[cached]
pub fn detect_headless() -> bool {
    if std::env::var("MOD_LOADING_SCREEN_HEADLESS")
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return true;
    }

    if cfg!(any(target_os = "windows", target_os = "macos")) {
        return false;
    }

    // Other Unix desktops need an X11 or Wayland server to draw to.
    std::env::var_os("DISPLAY").is_none() && std::env::var_os("WAYLAND_DISPLAY").is_none()
}

/// The host used by the display process, which has no loader of its own. Everything it needs
/// arrives in the event stream, so the queries return neutral answers.
#[derive(Debug, Clone)]
pub struct DetachedHost {
    variant: LoaderVariant,
    game_dir: PathBuf,
    config_dir: PathBuf,
}

impl DetachedHost {
    pub fn new(variant: LoaderVariant, game_dir: PathBuf, config_dir: PathBuf) -> DetachedHost {
        DetachedHost {
            variant,
            game_dir,
            config_dir,
        }
    }
}

impl Host for DetachedHost {
    fn variant(&self) -> LoaderVariant {
        self.variant
    }

    fn entrypoint_count(&self, _name: &str, _type_name: Option<&str>) -> usize {
        0
    }

    fn builtin_units(&self) -> Vec<UnitMetadata> {
        vec![]
    }

    fn unit_satisfies(&self, _id: &str, _predicate: &str) -> bool {
        false
    }

    fn is_headless(&self) -> bool {
        false
    }

    fn game_dir(&self) -> PathBuf {
        self.game_dir.clone()
    }

    fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    fn invoke_entrypoints(
        &self,
        _name: &str,
        _type_name: &str,
        _invoker: &mut dyn FnMut(&EntrypointContainer) -> eyre::Result<()>,
    ) -> Result<(), InvokeError> {
        Ok(())
    }
}
