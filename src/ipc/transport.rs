use std::{
    io::{self, Write},
    path::PathBuf,
    process::{Child, ChildStdin, Command, Stdio},
};

use eyre::{eyre, Result, WrapErr};
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    config::{Environment, ENV_IPC_CONFIG, ENV_IPC_PRESENT, ENV_IPC_QUILT, ENV_IPC_TITLE},
    host::LoaderVariant,
    progress::{Delivery, EventSink, ProgressEvent},
    protocol::{self, Frame},
};

/// The file name of the display process binary.
pub const CLIENT_EXECUTABLE: &str = if cfg!(windows) {
    "mls-ipc-client.exe"
} else {
    "mls-ipc-client"
};

/// Finds the display process binary: the override from the environment if there is one,
/// otherwise the binary sitting next to the current executable.
pub fn client_executable(env: &Environment) -> Result<PathBuf> {
    if let Some(path) = &env.ipc_client_path {
        return Ok(path.clone());
    }

    let current = std::env::current_exe().wrap_err("failed to locate current executable")?;

    let dir = current
        .parent()
        .ok_or_else(|| eyre!("executable {} has no parent directory", current.display()))?;

    Ok(dir.join(CLIENT_EXECUTABLE))
}

/// Everything needed to start the display process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub executable: PathBuf,
    pub run_dir: PathBuf,
    pub config_dir: PathBuf,
    pub variant: LoaderVariant,
    pub title: Option<String>,
}

impl SpawnConfig {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);

        command
            .env(ENV_IPC_PRESENT, "true")
            .env(ENV_IPC_QUILT, self.variant.is_quilt().to_string())
            .env(ENV_IPC_CONFIG, &self.config_dir)
            .current_dir(&self.run_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        if let Some(title) = &self.title {
            command.env(ENV_IPC_TITLE, title);
        }

        command
    }

    /// Starts the display process, returning a sink that feeds it.
    pub fn spawn(&self) -> Result<IpcSender<ChildStdin>> {
        let mut child = self
            .command()
            .spawn()
            .wrap_err_with(|| format!("failed to start {}", self.executable.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre!("display process has no stdin"))?;

        log::info!("Started display process (pid {})", child.id());

        Ok(IpcSender::with_child(stdin, child))
    }
}

/// Writes events to the display process.
pub struct IpcSender<W: Write + Send> {
    writer: Mutex<Option<W>>,
    child: Option<Child>,
}

impl<W: Write + Send> IpcSender<W> {
    pub fn new(writer: W) -> IpcSender<W> {
        IpcSender {
            writer: Mutex::new(Some(writer)),
            child: None,
        }
    }

    fn with_child(writer: W, child: Child) -> IpcSender<W> {
        IpcSender {
            writer: Mutex::new(Some(writer)),
            child: Some(child),
        }
    }

    /// Gives the writer back, if it hasn't been closed yet.
    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner()
    }

    fn send(&self, frame: &Frame) -> Result<(), SendError> {
        let bytes = frame.to_bytes().map_err(SendError::Encode)?;

        let mut writer = self.writer.lock();
        let writer = writer.as_mut().ok_or(SendError::Closed)?;

        writer
            .write_all(&bytes)
            .and_then(|_| writer.flush())
            .map_err(SendError::Io)
    }
}

enum SendError {
    Encode(protocol::ProtocolError),
    Io(io::Error),
    Closed,
}

impl<W: Write + Send> EventSink for IpcSender<W> {
    fn deliver(&mut self, event: &ProgressEvent) -> Delivery {
        let frame = Frame::from(event);

        match self.send(&frame) {
            Ok(()) => Delivery::Delivered,

            Err(SendError::Io(err)) if err.kind() == io::ErrorKind::BrokenPipe => {
                Delivery::Disconnected
            }

            Err(SendError::Closed) => Delivery::Disconnected,

            Err(SendError::Io(err)) => {
                log::error!(
                    "Failed to send IPC message (id {}): {}: {err}",
                    frame.id as u8,
                    frame.args.iter().join("\t")
                );

                Delivery::Dropped
            }

            Err(SendError::Encode(err)) => {
                log::error!(
                    "Failed to encode IPC message (id {}): {err}",
                    frame.id as u8
                );

                Delivery::Dropped
            }
        }
    }

    fn close(&mut self) {
        // Dropping the writer closes the pipe, which the display process reads as the end.
        if let Some(mut writer) = self.writer.lock().take() {
            if let Err(err) = writer.flush() {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    log::error!("Failed to close the display process pipe: {err}");
                }
            }
        }

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => log::info!("Display process exited with {status}"),
                Ok(None) => log::info!("Leaving display process {} to finish", child.id()),
                Err(err) => log::warn!("Failed to check on display process: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RUN_DIR;
    use std::{ffi::OsStr, path::Path};

    /// A writer whose reader has gone away.
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "The pipe is being closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A writer that fails for some other reason.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_reach_the_writer() {
        let mut sender = IpcSender::new(Vec::new());

        let event = ProgressEvent::EndEntrypointType {
            name: "main".to_string(),
        };
        assert_eq!(sender.deliver(&event), Delivery::Delivered);
        assert_eq!(sender.deliver(&ProgressEvent::Shutdown), Delivery::Delivered);

        let bytes = sender.into_inner().unwrap();
        let mut reader = bytes.as_slice();
        assert_eq!(protocol::decode(&mut reader).unwrap(), Some(event));
        assert_eq!(
            protocol::decode(&mut reader).unwrap(),
            Some(ProgressEvent::Shutdown)
        );
        assert_eq!(protocol::decode(&mut reader).unwrap(), None);
    }

    #[test]
    fn broken_pipe_is_a_disconnect() {
        let mut sender = IpcSender::new(ClosedPipe);
        assert_eq!(
            sender.deliver(&ProgressEvent::SetTitle("x".to_string())),
            Delivery::Disconnected
        );
    }

    #[test]
    fn other_failures_drop_the_event() {
        let mut sender = IpcSender::new(FullDisk);
        let event = ProgressEvent::SetTitle("x".to_string());

        assert_eq!(sender.deliver(&event), Delivery::Dropped);
        assert_eq!(sender.deliver(&event), Delivery::Dropped);

        let mut sender = IpcSender::new(Vec::new());
        let huge = ProgressEvent::SetTitle("x".repeat(70_000));
        assert_eq!(sender.deliver(&huge), Delivery::Dropped);
        assert!(sender.into_inner().unwrap().is_empty());
    }

    #[test]
    fn nothing_is_sent_after_close() {
        let mut sender = IpcSender::new(Vec::new());
        sender.close();
        sender.close();

        assert_eq!(
            sender.deliver(&ProgressEvent::Shutdown),
            Delivery::Disconnected
        );
        assert!(sender.into_inner().is_none());
    }

    #[test]
    fn spawn_environment() {
        let config = SpawnConfig {
            executable: PathBuf::from("/opt/mls/mls-ipc-client"),
            run_dir: Path::new("/games/mc").join(RUN_DIR),
            config_dir: PathBuf::from("/games/mc/config/mod-loading-screen"),
            variant: LoaderVariant::Quilt,
            title: Some("Loading Minecraft 1.20.1".to_string()),
        };

        let command = config.command();
        let envs: Vec<_> = command.get_envs().collect();

        let get = |key: &str| {
            envs.iter()
                .find(|(name, _)| *name == OsStr::new(key))
                .and_then(|(_, value)| *value)
        };

        assert_eq!(get(ENV_IPC_PRESENT), Some(OsStr::new("true")));
        assert_eq!(get(ENV_IPC_QUILT), Some(OsStr::new("true")));
        assert_eq!(
            get(ENV_IPC_CONFIG),
            Some(OsStr::new("/games/mc/config/mod-loading-screen"))
        );
        assert_eq!(get(ENV_IPC_TITLE), Some(OsStr::new("Loading Minecraft 1.20.1")));
        assert_eq!(
            command.get_current_dir(),
            Some(Path::new("/games/mc/.cache/mod-loading-screen"))
        );
    }

    #[test]
    fn client_path_override() {
        let env = Environment {
            ipc_client_path: Some(PathBuf::from("/custom/client")),
            ..Environment::default()
        };
        assert_eq!(client_executable(&env).unwrap(), PathBuf::from("/custom/client"));

        let default = client_executable(&Environment::default()).unwrap();
        assert_eq!(default.file_name().unwrap(), OsStr::new(CLIENT_EXECUTABLE));
    }
}
