//! The process-wide loading screen and the startup sequence that builds it.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::{
    api::Features,
    config::{Environment, Options, Paths, Role},
    host::Host,
    ipc::{client_executable, SpawnConfig},
    logging,
    memory::{MemorySource, SystemMemory, SAMPLE_PERIOD},
    overlay::{LogToolkit, OverlayDriver, Toolkit, WindowOptions},
    progress::{metadata_title, DisconnectAction, LoadingScreen},
    transform::{RuleTable, Transformer, DUMP_DIR},
};

static CONTEXT: OnceCell<Context> = OnceCell::new();

/// What the embedder provides at startup.
pub struct Startup {
    host: Arc<dyn Host>,
    env: Environment,
    toolkit: Box<dyn Toolkit>,
    memory: Box<dyn MemorySource>,
    disconnect_action: DisconnectAction,
}

impl Startup {
    pub fn new(host: Arc<dyn Host>) -> Startup {
        Startup {
            host,
            env: Environment::from_env(),
            toolkit: Box::new(LogToolkit),
            memory: Box::new(SystemMemory::new()),
            disconnect_action: DisconnectAction::Exit,
        }
    }

    pub fn with_environment(mut self, env: Environment) -> Startup {
        self.env = env;
        self
    }

    /// The toolkit used when this process draws the window itself.
    pub fn with_toolkit(mut self, toolkit: impl Toolkit + 'static) -> Startup {
        self.toolkit = Box::new(toolkit);
        self
    }

    pub fn with_memory_source(mut self, source: impl MemorySource + 'static) -> Startup {
        self.memory = Box::new(source);
        self
    }

    pub fn with_disconnect_action(mut self, action: DisconnectAction) -> Startup {
        self.disconnect_action = action;
        self
    }

    pub fn role(&self) -> Role {
        Role::detect(&self.env, self.host.is_headless())
    }

    /// The display process is started inside the run directory and told the config
    /// directory, so its host's directories are used as they are.
    pub fn paths(&self, role: Role) -> Paths {
        match role {
            Role::IpcClient => Paths {
                run_dir: self.host.game_dir(),
                config_dir: self
                    .env
                    .ipc_config_dir
                    .clone()
                    .unwrap_or_else(|| self.host.config_dir()),
            },

            Role::Embedded | Role::IpcServer => {
                Paths::new(&self.host.game_dir(), &self.host.config_dir())
            }
        }
    }
}

/// Everything that lives for as long as the process does.
pub struct Context {
    role: Role,
    paths: Paths,
    options: Options,
    screen: Arc<LoadingScreen>,
    transformer: Transformer,
}

impl Context {
    fn new(startup: Startup, role: Role, paths: Paths) -> Context {
        let Startup {
            host,
            env,
            mut toolkit,
            memory,
            disconnect_action,
        } = startup;

        log::info!(
            "Mod loading screen {} starting as {role:?} on {:?}",
            crate::VERSION,
            host.variant()
        );

        let options = Options::load(&paths.config_dir);

        let screen = Arc::new(
            LoadingScreen::new(role, host.clone()).with_disconnect_action(disconnect_action),
        );

        let attached = match role {
            Role::IpcServer => {
                let title = host
                    .builtin_units()
                    .iter()
                    .find_map(|unit| metadata_title(&unit.id, &unit.name, &unit.version));

                let sender = client_executable(&env).and_then(|executable| {
                    SpawnConfig {
                        executable,
                        run_dir: paths.run_dir.clone(),
                        config_dir: paths.config_dir.clone(),
                        variant: host.variant(),
                        title,
                    }
                    .spawn()
                });

                match sender {
                    Ok(sender) => screen.attach(Box::new(sender)),

                    Err(err) => {
                        log::error!("Failed to setup IPC client. Aborting. {err:?}");
                        false
                    }
                }
            }

            Role::Embedded if host.is_headless() => {
                log::info!(
                    "Running on a headless environment. Only some logging will be performed."
                );
                false
            }

            Role::Embedded | Role::IpcClient => {
                let window_options = WindowOptions::new(
                    host.variant(),
                    &paths.config_dir,
                    &options,
                    env.ipc_title.clone(),
                );

                match OverlayDriver::show(toolkit.as_mut(), &window_options) {
                    Ok(driver) => screen.attach(Box::new(driver)),

                    Err(err) => {
                        log::error!("Failed to open the loading screen window: {err:?}");
                        false
                    }
                }
            }
        };

        if attached {
            if role != Role::IpcClient {
                screen.adopt_builtin_title();
            }

            if options.enable_memory_display {
                screen.start_memory_sampler(memory, SAMPLE_PERIOD);
            }
        }

        let mut transformer = Transformer::new(RuleTable::standard());

        if env.dump_classes {
            transformer = transformer.with_dump_dir(host.game_dir().join(DUMP_DIR));
        }

        log::info!("API loaded with features: {}", Features::V1_0_4);

        Context {
            role,
            paths,
            options,
            screen,
            transformer,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn screen(&self) -> &Arc<LoadingScreen> {
        &self.screen
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }
}

/// Runs the startup sequence once. Later calls return the existing context and ignore their
/// argument.
pub fn start(startup: Startup) -> &'static Context {
    CONTEXT.get_or_init(|| {
        let role = startup.role();
        let paths = startup.paths(role);
        paths.create();

        if let Err(err) = logging::init(role, &paths.run_dir) {
            eprintln!("{} Failed to start logging: {err:?}", role.prefix());
        }

        Context::new(startup, role, paths)
    })
}

pub fn current() -> Option<&'static Context> {
    CONTEXT.get()
}

/// The loading screen, once startup has run.
pub fn get() -> Option<Arc<LoadingScreen>> {
    CONTEXT.get().map(|context| context.screen.clone())
}

/// The host's class-load hook. Returns the rewritten class, or `None` to keep the original.
pub fn instrument_class(name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
    CONTEXT.get()?.transformer.instrument_class(name, bytes)
}

/// Closes the loading screen if it's still up.
pub fn shutdown() {
    if let Some(context) = CONTEXT.get() {
        context.screen.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::{testing::FakeHost, UnitMetadata},
        memory::MemorySample,
        overlay::testing::{Call, RecordingToolkit},
    };
    use std::path::PathBuf;

    struct NoMemory;

    impl MemorySource for NoMemory {
        fn sample(&mut self) -> Option<MemorySample> {
            None
        }
    }

    fn host(game_dir: PathBuf, headless: bool) -> Arc<FakeHost> {
        Arc::new(FakeHost {
            game_dir,
            headless,
            builtins: vec![
                UnitMetadata::new("java", "OpenJDK 64-Bit Server VM", "17"),
                UnitMetadata::new("minecraft", "Minecraft", "1.20.1"),
            ],
            ..FakeHost::fabric()
        })
    }

    fn build(startup: Startup) -> Context {
        let role = startup.role();
        let paths = startup.paths(role);
        paths.create();

        Context::new(startup, role, paths)
    }

    #[test]
    fn embedded_startup() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = RecordingToolkit::default();

        let context = build(
            Startup::new(host(dir.path().to_path_buf(), false))
                .with_environment(Environment {
                    disable_ipc: true,
                    ..Environment::default()
                })
                .with_toolkit(toolkit.clone())
                .with_memory_source(NoMemory)
                .with_disconnect_action(DisconnectAction::Teardown),
        );

        assert_eq!(context.role(), Role::Embedded);
        assert!(context.screen().is_open());
        assert!(Options::path(&context.paths().config_dir).is_file());
        assert!(context
            .transformer()
            .handles(crate::transform::rules::FABRIC_ENTRYPOINT_UTILS));

        let shown = toolkit.shown.lock().clone().unwrap();
        assert_eq!(shown.title, "Loading Fabric Loader");
        assert!(toolkit
            .calls()
            .contains(&Call::Title("Loading Minecraft 1.20.1".to_string())));

        assert!(context.screen().close());
        assert_eq!(toolkit.calls().last(), Some(&Call::Dispose));
    }

    #[test]
    fn headless_startup_only_logs() {
        let dir = tempfile::tempdir().unwrap();
        let toolkit = RecordingToolkit::default();

        let context = build(
            Startup::new(host(dir.path().to_path_buf(), true))
                .with_environment(Environment::default())
                .with_toolkit(toolkit.clone())
                .with_memory_source(NoMemory)
                .with_disconnect_action(DisconnectAction::Teardown),
        );

        assert_eq!(context.role(), Role::Embedded);
        assert!(!context.screen().is_open());
        assert!(toolkit.shown.lock().is_none());
        assert!(toolkit.calls().is_empty());

        // Progress is still tracked with nothing to draw it.
        context
            .screen()
            .begin_entrypoint_type("main", "ModInitializer", 2);
        assert_eq!(context.screen().progress("entrypoint:main"), Some(0));
    }

    #[test]
    fn spawn_failure_leaves_the_host_running() {
        let dir = tempfile::tempdir().unwrap();

        let env = Environment {
            ipc_client_path: Some(dir.path().join("missing-client")),
            ..Environment::default()
        };

        let context = build(
            Startup::new(host(dir.path().to_path_buf(), false))
                .with_environment(env)
                .with_memory_source(NoMemory),
        );

        assert_eq!(context.role(), Role::IpcServer);
        assert_eq!(
            context.paths().run_dir,
            dir.path().join(crate::config::RUN_DIR)
        );
        assert!(!context.screen().is_open());
        assert!(!context.screen().maybe_close_after("client"));
    }

    #[test]
    fn display_process_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config").join("mod-loading-screen");
        let toolkit = RecordingToolkit::default();

        let env = Environment {
            ipc_client: true,
            ipc_quilt: true,
            ipc_config_dir: Some(config_dir.clone()),
            ipc_title: Some("Loading Minecraft 1.20.1".to_string()),
            ..Environment::default()
        };

        let context = build(
            Startup::new(host(dir.path().to_path_buf(), false))
                .with_environment(env)
                .with_toolkit(toolkit.clone())
                .with_memory_source(NoMemory),
        );

        assert_eq!(context.role(), Role::IpcClient);
        assert_eq!(context.paths().run_dir, dir.path());
        assert_eq!(context.paths().config_dir, config_dir);
        assert!(context.screen().is_open());

        let shown = toolkit.shown.lock().clone().unwrap();
        assert_eq!(shown.title, "Loading Minecraft 1.20.1");

        // The title comes from the game process; the local host isn't asked.
        assert!(!toolkit.calls().iter().any(|call| matches!(call, Call::Title(_))));
    }
}
