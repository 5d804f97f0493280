//! Background pumps and the time source that paces them.
//!
//! Reads never block, so something has to keep calling them. An
//! [`ActivePump`] does that on its own thread, sleeping through an injected
//! [`TimeProvider`] between ticks. Tests use [`ManualTimeProvider`] to step
//! time by hand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{AudioError, Result};
use crate::node::{AudioSource, AudioTarget, ReadResult};

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(AudioError::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AudioError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Clock used to schedule pump ticks.
pub trait TimeProvider: Send + Sync {
    /// Time elapsed since the provider was created.
    fn now(&self) -> Duration;

    /// Wait for `duration` to pass. Returns `false` if `cancel` fired first.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Wall-clock time.
pub struct RealTimeProvider {
    start: Instant,
}

impl RealTimeProvider {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for RealTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        const SLICE: Duration = Duration::from_millis(5);
        let deadline = Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLICE));
        }
    }
}

/// Time that only moves when [`advance`](Self::advance) is called.
#[derive(Default)]
pub struct ManualTimeProvider {
    now: Mutex<Duration>,
    moved: Condvar,
}

impl ManualTimeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward and wake every sleeper whose deadline has passed.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
        self.moved.notify_all();
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        let mut now = self.now.lock();
        let deadline = *now + duration;
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if *now >= deadline {
                return true;
            }
            // bounded wait so cancellation is noticed without an advance
            self.moved.wait_for(&mut now, Duration::from_millis(5));
        }
    }
}

/// Configuration for a background pump.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use klangnetz::pump::{ActivePump, RealTimeProvider};
/// # fn demo(source: Arc<dyn klangnetz::AudioSource>) -> klangnetz::Result<()> {
/// let handle = ActivePump::new(Arc::new(RealTimeProvider::new()))
///     .with_frames_per_tick(480)
///     .with_interval(Duration::from_millis(10))
///     .push_from(source)?;
/// handle.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct ActivePump {
    time: Arc<dyn TimeProvider>,
    frames_per_tick: usize,
    interval: Duration,
}

impl ActivePump {
    /// Defaults to 480 frames every 10 ms.
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            time,
            frames_per_tick: 480,
            interval: Duration::from_millis(10),
        }
    }

    pub fn with_frames_per_tick(mut self, frames: usize) -> Self {
        self.frames_per_tick = frames.max(1);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Keep pushing `source` into whatever its output is connected to.
    ///
    /// Stops by itself once the source finishes.
    pub fn push_from(self, source: Arc<dyn AudioSource>) -> Result<PumpHandle> {
        let name = format!("pump-push-{}", source.name());
        let frames = self.frames_per_tick;
        self.spawn(name, move || source.push_to_output(frames))
    }

    /// Keep pulling the input of `target` and writing the result into it.
    ///
    /// Stops by itself once the input finishes, after telling `target`.
    pub fn pull_into(self, target: Arc<dyn AudioTarget>) -> Result<PumpHandle> {
        let name = format!("pump-pull-{}", target.name());
        let channels = target.core().channels();
        let mut scratch = vec![0.0; self.frames_per_tick * channels];
        self.spawn(name, move || {
            let result = target.read_input(&mut scratch)?;
            match result {
                ReadResult::Read(n) => {
                    target.write(&scratch[..n * channels])?;
                }
                ReadResult::Finished => target.upstream_finished()?,
                ReadResult::Empty => {}
            }
            Ok(result)
        })
    }

    fn spawn<F>(self, name: String, mut tick: F) -> Result<PumpHandle>
    where
        F: FnMut() -> Result<ReadResult> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let ticks = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let thread_cancel = cancel.clone();
        let thread_ticks = ticks.clone();
        let thread_running = running.clone();
        let time = self.time;
        let interval = self.interval;
        let thread_name = name.clone();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                tracing::debug!(pump = %thread_name, "pump started");
                let outcome = loop {
                    if thread_cancel.is_cancelled() {
                        break Ok(());
                    }
                    match tick() {
                        Ok(ReadResult::Finished) => {
                            thread_ticks.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(pump = %thread_name, "source finished, pump exiting");
                            break Ok(());
                        }
                        Ok(_) => {
                            thread_ticks.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            tracing::warn!(pump = %thread_name, %err, "pump stopped on error");
                            break Err(err);
                        }
                    }
                    if !time.sleep(interval, &thread_cancel) {
                        break Ok(());
                    }
                };
                thread_running.store(false, Ordering::Release);
                outcome
            })
            .map_err(|e| AudioError::invalid_state(format!("failed to spawn {}: {}", name, e)))?;

        Ok(PumpHandle {
            name,
            cancel,
            ticks,
            running,
            thread: Some(thread),
        })
    }
}

/// Handle to a running pump. Dropping it stops the pump.
pub struct PumpHandle {
    name: String,
    cancel: CancelToken,
    ticks: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl PumpHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticks completed so far.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Whether the pump thread is still looping.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Token that stops the pump when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop the pump and wait for its thread. Returns the error that ended
    /// the pump early, if any.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| AudioError::Upstream(format!("{} panicked", self.name)))?,
            None => Ok(()),
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::debug!(pump = %self.name, %err, "pump ended with error");
        }
    }
}
