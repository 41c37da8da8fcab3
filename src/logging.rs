//! Logging backend which writes to the console and to a file in the run directory.

use std::{
    fs::File,
    io::Write,
    panic::PanicHookInfo,
    path::{Path, PathBuf},
    sync::mpsc::{self, Sender},
};

use cached::proc_macro::cached;
use chrono::Local;
use eyre::{Result, WrapErr};
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::config::Role;

struct Message {
    prefix: &'static str,
    module: String,
    level: Level,
    string: String,
    time: String,
}

impl Message {
    fn format(&self) -> String {
        let level_name = match self.level {
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug | Level::Trace => "debug",
        };

        format!(
            "{} [{}] [{}] [{}] {}",
            self.prefix, self.time, self.module, level_name, self.string
        )
    }

    fn write(&self, file: Option<&mut File>) {
        let line = self.format();

        if self.level <= Level::Warn {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }

        if let Some(file) = file {
            let _ = writeln!(file, "{line}");
        }
    }
}

struct Output {
    prefix: &'static str,
    sender: Mutex<Sender<Message>>,
    panic_path: PathBuf,
}

static OUTPUT: OnceCell<Output> = OnceCell::new();
static LOGGER: Logger = Logger;

struct Logger;

impl Logger {
    fn commit(&self, record: &Record) {
        let Some(output) = OUTPUT.get() else {
            return;
        };

        let message = Message {
            prefix: output.prefix,
            module: record
                .module_path()
                .and_then(|path| path.split("::").last())
                .unwrap_or("unknown")
                .to_string(),
            level: record.level(),
            string: record.args().to_string(),
            time: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        };

        // The writer thread only goes away with the process.
        let _ = output.sender.lock().send(message);
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.commit(record);
        }
    }

    fn flush(&self) {}
}

fn max_level() -> LevelFilter {
    if cfg!(feature = "debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

#[cached]
fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn panic_message(info: &PanicHookInfo) -> String {
    let message = info
        .payload()
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "no message".to_string());

    let location = info
        .location()
        .map(|location| location.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{message} (at {location})")
}

/// The display process has nothing worth saving once it panics.
fn display_process_panic_hook(info: &PanicHookInfo) {
    let backtrace = backtrace::Backtrace::new();

    let info_dump = format!(
        "The loading screen crashed in {}.

Message: {}
Time: {}

{backtrace:?}",
        process_name(),
        panic_message(info),
        Local::now(),
    );

    // The writer thread won't get a chance to run before the abort.
    eprintln!("{info_dump}");

    if let Some(output) = OUTPUT.get() {
        let _ = std::fs::write(&output.panic_path, &info_dump);
    }

    std::process::abort();
}

fn install_panic_hook(role: Role) {
    if role == Role::IpcClient {
        std::panic::set_hook(Box::new(display_process_panic_hook));
        return;
    }

    // The game's own hook still runs, and the panic keeps unwinding.
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("Panic: {}", panic_message(info));
        previous(info);
    }));
}

/// Starts logging for `role`. Only the first call does anything.
pub fn init(role: Role, run_dir: &Path) -> Result<()> {
    if OUTPUT.get().is_some() {
        return Ok(());
    }

    let (sender, receiver) = mpsc::channel::<Message>();

    let output = Output {
        prefix: role.prefix(),
        sender: Mutex::new(sender),
        panic_path: run_dir.join("PANIC.txt"),
    };

    if OUTPUT.set(output).is_err() {
        return Ok(());
    }

    let log_path = run_dir.join(role.log_file_name());
    let (mut log_file, file_error) = match File::create(&log_path) {
        Ok(file) => (Some(file), None),
        Err(err) => (None, Some(err)),
    };

    // Callers on the loading path never touch the console or the disk.
    std::thread::Builder::new()
        .name("mls-log".to_string())
        .spawn(move || {
            while let Ok(message) = receiver.recv() {
                message.write(log_file.as_mut());
            }
        })
        .wrap_err("starting log writer thread")?;

    install_panic_hook(role);

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(max_level());
    }

    log::info!(
        "Logging started for {} at {}",
        process_name(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(err) = file_error {
        log::warn!("Unable to create {}: {err}", log_path.display());
    }

    Ok(())
}
