//! Bounded pool running the tree-building executable once per shard.

use crate::config::{Configuration, EntropyMeasure};
use crate::ForestError;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub executable: PathBuf,
    pub discretization_threshold: u32,
    pub entropy_measure: EntropyMeasure,
    pub tnorms: usize,
    pub max_workers: usize,
    pub timeout: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            executable: config.worker.clone(),
            discretization_threshold: config.discretization_threshold,
            entropy_measure: config.entropy_measure,
            tnorms: config.tnorms,
            max_workers: config.worker_limit(),
            timeout: Duration::from_secs(config.worker_timeout_secs),
        }
    }

    /// `-R -L -M -N -c <threshold> [-u] -f <tnorms> <shard> <reference>`
    pub fn arguments(&self, shard: &Path, reference: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-R", "-L", "-M", "-N", "-c"].iter().map(OsString::from).collect();
        args.push(self.discretization_threshold.to_string().into());
        if self.entropy_measure == EntropyMeasure::Shannon {
            args.push("-u".into());
        }
        args.push("-f".into());
        args.push(self.tnorms.to_string().into());
        args.push(shard.into());
        args.push(reference.into());
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutput {
    pub shard: PathBuf,
    pub stdout: String,
}

/// Runs one worker per shard, at most `options.max_workers` at a time, and
/// returns one result per shard in shard order. The first failure cancels
/// every shard still queued or running.
pub fn run_forest(shards: &[PathBuf], reference: &Path, options: &WorkerOptions) -> Vec<Result<WorkerOutput, ForestError>> {
    let workers = options.max_workers.clamp(1, shards.len().max(1));
    info!("[worker] {} shards on {} workers", shards.len(), workers);

    let (job_tx, job_rx) = unbounded::<(usize, &Path)>();
    for (index, shard) in shards.iter().enumerate() {
        // The receiver is alive until the scope below ends.
        let _ = job_tx.send((index, shard.as_path()));
    }
    drop(job_tx);

    let (result_tx, result_rx) = unbounded();
    let cancel = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = &cancel;
            scope.spawn(move || {
                for (index, shard) in job_rx.iter() {
                    let result = if cancel.load(Ordering::SeqCst) {
                        Err(ForestError::WorkerCancelled(shard.to_path_buf()))
                    } else {
                        run_worker(shard, reference, options, cancel)
                    };
                    if let Err(e) = &result {
                        if !matches!(e, ForestError::WorkerCancelled(_)) {
                            warn!("[worker] {}", e);
                            cancel.store(true, Ordering::SeqCst);
                        }
                    }
                    if result_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<Result<WorkerOutput, ForestError>>> = shards.iter().map(|_| None).collect();
    for (index, result) in result_rx.iter() {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .zip(shards)
        .map(|(slot, shard)| slot.unwrap_or_else(|| Err(ForestError::WorkerCancelled(shard.clone()))))
        .collect()
}

/// Every output, or the first real failure. Cancellations only surface when
/// nothing else failed.
pub fn collect_outputs(results: Vec<Result<WorkerOutput, ForestError>>) -> Result<Vec<WorkerOutput>, ForestError> {
    let mut outputs = Vec::with_capacity(results.len());
    let mut cancelled = None;
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(e @ ForestError::WorkerCancelled(_)) => {
                cancelled.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    match cancelled {
        Some(e) => Err(e),
        None => Ok(outputs),
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

fn run_worker(shard: &Path, reference: &Path, options: &WorkerOptions, cancel: &AtomicBool) -> Result<WorkerOutput, ForestError> {
    let started = Instant::now();
    debug!("[worker] starting {}", shard.display());

    let mut child = Command::new(&options.executable)
        .args(options.arguments(shard, reference))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ForestError::WorkerFailure {
            shard: shard.to_path_buf(),
            status: None,
            stderr: format!("failed to start {}: {}", options.executable.display(), e),
        })?;

    let deadline = started + options.timeout;
    // Readers are detached: a grandchild holding the pipes open must not
    // keep the shard past its deadline.
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());
    let waited = wait_for(&mut child, deadline, cancel);

    let collect = |reader: Receiver<io::Result<Vec<u8>>>| -> Result<Vec<u8>, ForestError> {
        match reader.recv_deadline(deadline) {
            Ok(bytes) => Ok(bytes?),
            Err(RecvTimeoutError::Timeout) => Err(ForestError::WorkerTimeout {
                shard: shard.to_path_buf(),
                seconds: options.timeout.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::other("worker output reader panicked").into()),
        }
    };

    match waited? {
        Waited::Exited(status) if status.success() => {
            debug!(
                "[worker] {} finished in {:.1}s",
                shard.display(),
                started.elapsed().as_secs_f64()
            );
            Ok(WorkerOutput {
                shard: shard.to_path_buf(),
                stdout: String::from_utf8_lossy(&collect(stdout)?).into_owned(),
            })
        }
        Waited::Exited(status) => Err(ForestError::WorkerFailure {
            shard: shard.to_path_buf(),
            status: status.code(),
            stderr: String::from_utf8_lossy(&collect(stderr)?).trim().to_string(),
        }),
        Waited::TimedOut => Err(ForestError::WorkerTimeout {
            shard: shard.to_path_buf(),
            seconds: options.timeout.as_secs(),
        }),
        Waited::Cancelled => Err(ForestError::WorkerCancelled(shard.to_path_buf())),
    }
}

fn wait_for(child: &mut Child, deadline: Instant, cancel: &AtomicBool) -> Result<Waited, ForestError> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Waited::Exited(status)),
            Ok(None) => {}
            Err(e) => {
                stop(child);
                return Err(e.into());
            }
        }
        if cancel.load(Ordering::SeqCst) {
            stop(child);
            return Ok(Waited::Cancelled);
        }
        if Instant::now() >= deadline {
            stop(child);
            return Ok(Waited::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn stop(child: &mut Child) {
    // Already exited is fine.
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let result = match source {
            Some(mut source) => source.read_to_end(&mut buffer).map(|_| buffer),
            None => Ok(buffer),
        };
        // Nobody listens once the shard gave up on its output.
        let _ = tx.send(result);
    });
    rx
}
