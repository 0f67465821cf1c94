use crate::condition::{ConditionConfig, ConditionStore};
use crate::config::MonitorConfig;
use crate::error::{CollectorError, MonitorError};
use crate::monitor::Monitor;
use crate::rules::RuleEngine;
use crate::types::{Observation, Status};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Input side of a monitor
///
/// `open` runs on the caller's thread inside `start`; `collect` and `close`
/// run on the monitor's own thread.
pub trait Probe: Send + 'static {
    /// Open the input source; an error here aborts `start`
    fn open(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }

    /// Everything observed since the previous call
    fn collect(&mut self) -> Result<Vec<Observation>, CollectorError>;

    /// Release the input source when the loop exits
    fn close(&mut self) {}
}

/// Lifecycle of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopping,
    Stopped,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Monitor implementation driving a [`Probe`] through the rule engine
///
/// The stop signal is a dedicated channel: the loop waits on it with the time
/// left until the next tick, so a stop request wakes it immediately. The join
/// handle is the completion signal.
pub struct MonitorRunner<P: Probe> {
    source: String,
    interval: Duration,
    defaults: Vec<ConditionConfig>,
    engine: Mutex<Option<RuleEngine>>,
    probe: Mutex<Option<P>>,
    state: Arc<Mutex<LifecycleState>>,
    stop_sender: Mutex<Option<Sender<()>>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Probe> MonitorRunner<P> {
    pub fn new(
        source: impl Into<String>,
        interval: Duration,
        defaults: Vec<ConditionConfig>,
        engine: RuleEngine,
        probe: P,
    ) -> Self {
        Self {
            source: source.into(),
            interval,
            defaults,
            engine: Mutex::new(Some(engine)),
            probe: Mutex::new(Some(probe)),
            state: Arc::new(Mutex::new(LifecycleState::Created)),
            stop_sender: Mutex::new(None),
            thread_handle: Mutex::new(None),
        }
    }

    /// Build a runner from a validated configuration file
    pub fn from_config<T>(config: MonitorConfig<T>, probe: P) -> Self {
        Self::new(
            config.source,
            config.invoke_interval,
            config.conditions,
            RuleEngine::new(config.rules),
            probe,
        )
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
    /// `start` with the thread creation supplied by the caller
    ///
    /// The probe and engine are handed to the new thread only once it exists,
    /// so a failed spawn closes the probe and leaves the monitor restartable.
    fn start_with(
        &self,
        spawn: impl FnOnce(Box<dyn FnOnce() + Send>) -> std::io::Result<JoinHandle<()>>,
    ) -> Result<Receiver<Status>, MonitorError> {
        let mut state = lock(&self.state);
        if *state != LifecycleState::Created {
            return Err(MonitorError::AlreadyStarted(self.source.clone()));
        }

        let mut probe_slot = lock(&self.probe);
        let mut engine_slot = lock(&self.engine);
        let (Some(mut probe), Some(engine)) = (probe_slot.take(), engine_slot.take()) else {
            return Err(MonitorError::AlreadyStarted(self.source.clone()));
        };

        if let Err(e) = probe.open() {
            // Keep the monitor in Created so nothing is left running.
            *probe_slot = Some(probe);
            *engine_slot = Some(engine);
            return Err(MonitorError::SourceUnavailable {
                source_name: self.source.clone(),
                error: e,
            });
        }

        let (handoff, pending) = mpsc::channel::<(LoopContext, P)>();
        let spawned = spawn(Box::new(move || {
            if let Ok((context, probe)) = pending.recv() {
                context.run(probe);
            }
        }));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn thread for monitor {}: {}", self.source, e);
                probe.close();
                *probe_slot = Some(probe);
                *engine_slot = Some(engine);
                return Err(MonitorError::ThreadSpawn(e));
            }
        };

        let (status_sender, status_receiver) = mpsc::channel();
        let (stop_sender, stop_receiver) = mpsc::channel();
        let context = LoopContext {
            source: self.source.clone(),
            interval: self.interval,
            store: ConditionStore::from_config(&self.defaults, Utc::now()),
            engine,
            output: status_sender,
            stop: stop_receiver,
            state: Arc::clone(&self.state),
        };
        // The thread holds `pending` until it receives, so this only fails if it died first.
        if let Err(mpsc::SendError((context, mut probe))) = handoff.send((context, probe)) {
            probe.close();
            *engine_slot = Some(context.engine);
            *probe_slot = Some(probe);
            let _ = handle.join();
            return Err(MonitorError::ThreadSpawn(std::io::Error::new(
                std::io::ErrorKind::Other,
                "monitor thread exited before it started",
            )));
        }

        *lock(&self.stop_sender) = Some(stop_sender);
        *lock(&self.thread_handle) = Some(handle);
        *state = LifecycleState::Running;
        info!(
            "Monitor {} started with interval {:?}",
            self.source, self.interval
        );
        Ok(status_receiver)
    }
}

impl<P: Probe> Monitor for MonitorRunner<P> {
    fn name(&self) -> &str {
        &self.source
    }

    fn start(&self) -> Result<Receiver<Status>, MonitorError> {
        let name = format!("monitor-{}", self.source);
        self.start_with(move |body| thread::Builder::new().name(name).spawn(body))
    }

    fn stop(&self) {
        let Some(stop_sender) = lock(&self.stop_sender).take() else {
            debug!("Monitor {} is not running, nothing to stop", self.source);
            let mut state = lock(&self.state);
            if *state == LifecycleState::Created {
                *state = LifecycleState::Stopped;
            }
            return;
        };

        info!("Stopping monitor {}", self.source);
        {
            let mut state = lock(&self.state);
            if *state == LifecycleState::Running {
                *state = LifecycleState::Stopping;
            }
        }
        // The loop may already have exited on its own.
        let _ = stop_sender.send(());

        if let Some(handle) = lock(&self.thread_handle).take() {
            if handle.join().is_err() {
                error!("Monitor {} thread panicked", self.source);
            }
        }
        *lock(&self.state) = LifecycleState::Stopped;
        info!("Monitor {} stopped", self.source);
    }
}

impl<P: Probe> Drop for MonitorRunner<P> {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Running {
            self.stop();
        }
    }
}

/// Everything the loop thread owns
struct LoopContext {
    source: String,
    interval: Duration,
    store: ConditionStore,
    engine: RuleEngine,
    output: Sender<Status>,
    stop: Receiver<()>,
    state: Arc<Mutex<LifecycleState>>,
}

impl LoopContext {
    fn run(mut self, mut probe: impl Probe) {
        debug!("Monitor loop for {} started", self.source);

        // Announce the default conditions so every type is known downstream.
        let initial = Status {
            source: self.source.clone(),
            conditions: self.store.snapshot(),
            events: Vec::new(),
        };

        if self.output.send(initial).is_ok() && !self.stop_requested() {
            let mut next_tick = Instant::now();
            loop {
                if !self.cycle(&mut probe) {
                    debug!("Status receiver for {} is gone", self.source);
                    break;
                }

                next_tick += self.interval;
                let now = Instant::now();
                if next_tick < now {
                    // Cycle overran; skip missed ticks instead of bursting.
                    next_tick = now + self.interval;
                }
                match self.stop.recv_timeout(next_tick - now) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        probe.close();
        *lock(&self.state) = LifecycleState::Stopped;
        info!("Monitor loop for {} exited", self.source);
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    /// One evaluation cycle; returns false once nobody listens any more
    fn cycle(&mut self, probe: &mut impl Probe) -> bool {
        let batch = match probe.collect() {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Monitor {} failed to collect this cycle: {}", self.source, e);
                return true;
            }
        };

        let outcome = self.engine.evaluate(&mut self.store, &batch);
        if !outcome.is_change() {
            return true;
        }

        debug!(
            "Monitor {} publishing status with {} event(s)",
            self.source,
            outcome.events.len()
        );
        let status = Status {
            source: self.source.clone(),
            conditions: self.store.snapshot(),
            events: outcome.events,
        };
        self.output.send(status).is_ok()
    }
}
