use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::coordinator::StateCoordinator;

/// Source of "now" for timestamps and timers.
///
/// Timestamps are truncated to milliseconds, the precision of the wire format.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start.trunc_subsecs(3))),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to.trunc_subsecs(3);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::weeks(52))
}

/// A single cancellable deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduledTask {
    deadline: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// Schedule at `at`, replacing any earlier schedule
    pub fn schedule(&mut self, at: DateTime<Utc>) {
        self.deadline = Some(at);
    }

    /// Cancel and reschedule `delay` after `now`
    pub fn reset(&mut self, now: DateTime<Utc>, delay: Duration) {
        self.schedule(now + delta(delay));
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Fire the task if its deadline has passed. A fired task is no longer pending.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// One debounced task per key: each trigger pushes the deadline back.
#[derive(Debug, Clone)]
pub struct Debouncer<K> {
    delay: Duration,
    tasks: HashMap<K, ScheduledTask>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tasks: HashMap::new(),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the quiet window for `key`
    pub fn trigger(&mut self, key: K, now: DateTime<Utc>) {
        self.tasks
            .entry(key)
            .or_default()
            .reset(now, self.delay);
    }

    /// Make `key` due right away
    pub fn trigger_now(&mut self, key: K, now: DateTime<Utc>) {
        self.tasks.entry(key).or_default().schedule(now);
    }

    pub fn cancel(&mut self, key: &K) {
        self.tasks.remove(key);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.tasks.values().filter_map(ScheduledTask::deadline).min()
    }

    /// Remove and return the keys whose quiet window has elapsed, earliest first
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let mut due: Vec<(DateTime<Utc>, K)> = self
            .tasks
            .iter()
            .filter_map(|(k, t)| t.deadline().filter(|at| *at <= now).map(|at| (at, k.clone())))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, key) in &due {
            self.tasks.remove(key);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }

    /// Make every pending key due immediately
    pub fn fire_all(&mut self, now: DateTime<Utc>) {
        for task in self.tasks.values_mut() {
            task.schedule(now);
        }
    }
}

/// Fixed-period task. Firing reschedules one period later.
#[derive(Debug, Clone)]
pub struct Interval {
    period: Duration,
    task: ScheduledTask,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            task: ScheduledTask::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// First tick one period after `now`
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.task.reset(now, self.period);
    }

    /// Tick as soon as possible
    pub fn fire_now(&mut self, now: DateTime<Utc>) {
        self.task.schedule(now);
    }

    pub fn stop(&mut self) {
        self.task.cancel();
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.task.deadline()
    }

    pub fn take_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.task.take_due(now) {
            self.task.reset(now, self.period);
            true
        } else {
            false
        }
    }
}

/// Upper bound on one driver sleep, so clock changes are noticed
const MAX_IDLE: Duration = Duration::from_secs(60);

type Job = Box<dyn FnOnce(&mut StateCoordinator) + Send>;

/// Messages to control the coordinator driver
enum DriverMessage {
    /// Run a closure against the coordinator
    Run(Job),
    /// Flush pending work and stop
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
#[error("Coordinator driver has stopped")]
pub struct DriverStopped;

/// Handle to a coordinator running inside [`spawn_coordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<DriverMessage>,
}

impl CoordinatorHandle {
    /// Run `f` on the coordinator and return its result.
    ///
    /// Closures run one at a time between effect completions, so the
    /// coordinator is never mutated concurrently.
    pub async fn call<R, F>(&self, f: F) -> Result<R, DriverStopped>
    where
        R: Send + 'static,
        F: FnOnce(&mut StateCoordinator) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |coordinator| {
            let _ = tx.send(f(coordinator));
        });
        self.sender
            .send(DriverMessage::Run(job))
            .await
            .map_err(|_| DriverStopped)?;
        rx.await.map_err(|_| DriverStopped)
    }

    /// Forward an environment connectivity signal
    pub async fn set_online(&self, online: bool) -> Result<(), DriverStopped> {
        self.call(move |c| c.set_online(online)).await
    }

    /// Ask the driver to flush and stop
    pub async fn shutdown(&self) {
        let _ = self.sender.send(DriverMessage::Shutdown).await;
    }
}

/// Run `coordinator` on its own task.
///
/// The task returns the coordinator after shutdown, once pending persists
/// have been flushed.
pub fn spawn_coordinator(
    coordinator: StateCoordinator,
) -> (CoordinatorHandle, JoinHandle<StateCoordinator>) {
    let (tx, rx) = mpsc::channel(32);
    let task = tokio::spawn(run_coordinator(coordinator, rx));
    (CoordinatorHandle { sender: tx }, task)
}

/// Main driver loop
async fn run_coordinator(
    mut coordinator: StateCoordinator,
    mut receiver: mpsc::Receiver<DriverMessage>,
) -> StateCoordinator {
    log::info!("Coordinator driver started");
    let mut in_flight = FuturesUnordered::new();

    loop {
        for effect in coordinator.take_due() {
            in_flight.push(coordinator.runner().run(effect));
        }

        let wait = coordinator
            .next_wakeup()
            .map(|at| (at - coordinator.now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_IDLE)
            .min(MAX_IDLE);

        tokio::select! {
            Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                coordinator.apply(outcome);
            }

            _ = tokio::time::sleep(wait) => {}

            msg = receiver.recv() => {
                match msg {
                    Some(DriverMessage::Run(job)) => job(&mut coordinator),
                    Some(DriverMessage::Shutdown) | None => {
                        log::info!("Coordinator driver: shutting down");
                        break;
                    }
                }
            }
        }
    }

    while let Some(outcome) = in_flight.next().await {
        coordinator.apply(outcome);
    }
    coordinator.flush_all().await;
    coordinator
}
