//! Runtime configuration: environment flags, directories, and the small persisted options file.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::host::LoaderVariant;

/// Set in the display process's environment so it knows it's the IPC client.
pub const ENV_IPC_PRESENT: &str = "MLS_IPC_PRESENT";

/// `true` if the game process is running on Quilt.
pub const ENV_IPC_QUILT: &str = "MLS_IPC_QUILT";

/// The resolved config directory, passed to the display process.
pub const ENV_IPC_CONFIG: &str = "MLS_IPC_CONFIG";

/// The window title, if the game process already knows it at spawn time.
pub const ENV_IPC_TITLE: &str = "MLS_IPC_TITLE";

/// Opts out of the separate display process.
pub const ENV_DISABLE_IPC: &str = "MOD_LOADING_SCREEN_DISABLE_IPC";

/// Dumps transformed classes to disk.
pub const ENV_DUMP_CLASSES: &str = "MOD_LOADING_SCREEN_DUMP_CLASSES";

/// Overrides the path of the display process executable.
pub const ENV_IPC_CLIENT_PATH: &str = "MOD_LOADING_SCREEN_IPC_CLIENT";

/// The run directory, relative to the game directory. Logs and the display process live here.
pub const RUN_DIR: &str = ".cache/mod-loading-screen";

/// The config directory name inside the loader's config directory.
pub const CONFIG_DIR_NAME: &str = "mod-loading-screen";

/// Image formats accepted for `background.<ext>`.
pub const BACKGROUND_FORMATS: &[&str] = &["gif", "jpeg", "png", "xbm"];

/// Image formats accepted for `icon.<ext>`.
pub const ICON_FORMATS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp"];

/// Which half of the system this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Everything in one process: the overlay is drawn right here.
    Embedded,

    /// The game process, forwarding events to a display process.
    IpcServer,

    /// The display process.
    IpcClient,
}

impl Role {
    /// Decides the role from the environment and whether a display exists.
    pub fn detect(env: &Environment, headless: bool) -> Role {
        if env.ipc_client {
            Role::IpcClient
        } else if !headless && !env.disable_ipc {
            Role::IpcServer
        } else {
            Role::Embedded
        }
    }

    /// The tag at the start of every log line, so operators can tell the halves apart.
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Embedded => "[ModLoadingScreen]",
            Role::IpcServer => "[ModLoadingScreen (IPC server)]",
            Role::IpcClient => "[ModLoadingScreen (IPC client)]",
        }
    }

    pub fn log_file_name(self) -> &'static str {
        match self {
            Role::Embedded => "screen-log.txt",
            Role::IpcServer => "ipc-server-log.txt",
            Role::IpcClient => "ipc-client-log.txt",
        }
    }

    pub fn uses_ipc(self) -> bool {
        self == Role::IpcServer
    }
}

/// Flags read from environment variables, once, at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub ipc_client: bool,
    pub ipc_quilt: bool,
    pub ipc_config_dir: Option<PathBuf>,
    pub ipc_title: Option<String>,
    pub disable_ipc: bool,
    pub dump_classes: bool,
    pub ipc_client_path: Option<PathBuf>,
}

impl Environment {
    pub fn from_env() -> Environment {
        Environment::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the flags from any key/value lookup. Boolean flags follow the loader's own
    /// convention: only a case-insensitive `true` counts.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Environment {
        let flag = |key: &str| {
            lookup(key)
                .map(|value| value.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        Environment {
            ipc_client: flag(ENV_IPC_PRESENT),
            ipc_quilt: flag(ENV_IPC_QUILT),
            ipc_config_dir: lookup(ENV_IPC_CONFIG).map(PathBuf::from),
            ipc_title: lookup(ENV_IPC_TITLE).filter(|title| !title.is_empty()),
            disable_ipc: flag(ENV_DISABLE_IPC),
            dump_classes: flag(ENV_DUMP_CLASSES) || cfg!(feature = "debug"),
            ipc_client_path: lookup(ENV_IPC_CLIENT_PATH).map(PathBuf::from),
        }
    }

    /// The loader variant as told to the display process.
    pub fn ipc_variant(&self) -> LoaderVariant {
        if self.ipc_quilt {
            LoaderVariant::Quilt
        } else {
            LoaderVariant::Fabric
        }
    }
}

/// The user's options, stored as JSON in the config directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Whether the memory bar is shown at the top of the overlay.
    pub enable_memory_display: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            enable_memory_display: true,
        }
    }
}

impl Options {
    /// Returns the path of the file that options are saved to.
    pub fn path(config_dir: &Path) -> PathBuf {
        config_dir.join("config.json")
    }

    fn parse_json(reader: impl Read) -> Result<Options> {
        Ok(serde_json::from_reader(reader)?)
    }

    fn load_from_file(config_dir: &Path) -> Result<Option<Options>> {
        let path = Options::path(config_dir);

        if !path.exists() {
            // Not an error, we just haven't written one yet.
            return Ok(None);
        }

        let file =
            File::open(&path).wrap_err_with(|| format!("opening {}", path.display()))?;

        Ok(Some(Options::parse_json(file)?))
    }

    /// Saves the options, returning any errors encountered.
    pub fn try_save(&self, config_dir: &Path) -> Result<()> {
        std::fs::write(
            Options::path(config_dir),
            serde_json::to_string_pretty(self)?,
        )
        .wrap_err("writing options")?;

        Ok(())
    }

    /// Loads the options or falls back to defaults, then writes them straight back so that the
    /// user always has a complete file to edit.
    pub fn load(config_dir: &Path) -> Options {
        let options = match Options::load_from_file(config_dir) {
            Ok(Some(options)) => options,

            Ok(None) => {
                log::info!("No config file found. Defaults will be used.");
                Options::default()
            }

            Err(err) => {
                log::error!("Failed to load config: {err:?}. Defaults will be used.");
                Options::default()
            }
        };

        if let Err(err) = options.try_save(config_dir) {
            log::error!("Failed to write config: {err:?}");
        }

        options
    }
}

/// Finds a user-supplied image named `<prefix>.<format>` in the config directory.
pub fn find_image(config_dir: &Path, prefix: &str, formats: &[&str]) -> Option<PathBuf> {
    formats
        .iter()
        .map(|format| config_dir.join(format!("{prefix}.{format}")))
        .find(|path| path.is_file())
}

/// Where the loading screen keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub run_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl Paths {
    pub fn new(game_dir: &Path, loader_config_dir: &Path) -> Paths {
        Paths {
            run_dir: game_dir.join(RUN_DIR),
            config_dir: loader_config_dir.join(CONFIG_DIR_NAME),
        }
    }

    /// Creates both directories. Failures are logged; the overlay works without them.
    pub fn create(&self) {
        for dir in [&self.run_dir, &self.config_dir] {
            if let Err(err) = std::fs::create_dir_all(dir) {
                log::error!("Failed to create {}: {err}", dir.display());
            }
        }
    }
}
