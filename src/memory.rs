//! Background sampling of memory usage for the memory bar.

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use sysinfo::System;

/// How often the memory bar is refreshed.
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(100);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A single reading, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used: u64,
    pub total: u64,
}

impl MemorySample {
    /// The reading rounded to whole megabytes, as shown on the memory bar.
    pub fn megabytes(self) -> (i32, i32) {
        (to_megabytes(self.used), to_megabytes(self.total))
    }
}

pub fn to_megabytes(bytes: u64) -> i32 {
    (bytes as f64 / BYTES_PER_MB).round() as i32
}

/// The text drawn on the memory bar.
pub fn describe(used: u64, total: u64) -> String {
    format!("{} MB / {} MB", to_megabytes(used), to_megabytes(total))
}

pub trait MemorySource: Send {
    fn sample(&mut self) -> Option<MemorySample>;
}

/// Reads system memory through `sysinfo`. Embedders with a managed heap should supply their
/// own source instead.
pub struct SystemMemory {
    system: System,
}

impl SystemMemory {
    pub fn new() -> SystemMemory {
        SystemMemory {
            system: System::new(),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        SystemMemory::new()
    }
}

impl MemorySource for SystemMemory {
    fn sample(&mut self) -> Option<MemorySample> {
        self.system.refresh_memory();

        let total = self.system.total_memory();

        if total == 0 {
            return None;
        }

        Some(MemorySample {
            used: self.system.used_memory(),
            total,
        })
    }
}

/// A running sampler thread. Dropping this without calling [`MemorySampler::stop`] leaves the
/// thread to notice the disconnected channel on its next tick.
pub struct MemorySampler {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl MemorySampler {
    /// Starts sampling `source` every `period`. The first sample is taken straight away. The
    /// thread ends when `on_sample` returns `false` or the sampler is stopped.
    pub fn spawn(
        period: Duration,
        mut source: Box<dyn MemorySource>,
        mut on_sample: impl FnMut(MemorySample) -> bool + Send + 'static,
    ) -> io::Result<MemorySampler> {
        let (stop, stopped): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("MemoryUsageListener".to_string())
            .spawn(move || loop {
                if let Some(sample) = source.sample() {
                    if !on_sample(sample) {
                        break;
                    }
                }

                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(MemorySampler {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it, unless we *are* the thread (teardown can be
    /// triggered from inside a sample callback), in which case it exits after the callback.
    pub fn stop(mut self) {
        let _ = self.stop.try_send(());

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }

            if handle.join().is_err() {
                log::error!("Memory sampler thread panicked");
            }
        }
    }
}
