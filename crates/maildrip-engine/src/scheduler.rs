//! Scheduler — three independent periodic triggers.
//!
//! One check loop (a single tokio interval) wakes up, sees which job
//! schedules have come due, and spawns each due job as its own task, so
//! the drip dispatch and the two broadcasts can overlap each other but a
//! job never overlaps itself: every job carries a re-entrancy guard and a
//! tick that finds the previous run still in flight is skipped, not run
//! concurrently.
//!
//! `start` and `stop` are idempotent. Stopping halts future ticks only —
//! an in-flight run always completes.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use maildrip_core::config::SchedulerConfig;
use maildrip_core::error::{MaildripError, Result};

use crate::broadcast::{BroadcastSummary, Broadcaster};
use crate::cron;
use crate::dispatcher::{BatchDispatcher, DispatchSummary};

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Drip,
    Daily,
    Weekly,
}

struct Job {
    name: &'static str,
    cron: String,
    next_run: Mutex<Option<DateTime<Utc>>>,
    running: Arc<AtomicBool>,
}

impl Job {
    fn new(name: &'static str, cron_expr: &str) -> Result<Self> {
        if !cron::validate(cron_expr) {
            return Err(MaildripError::Config(format!(
                "invalid cron expression for {name}: '{cron_expr}'"
            )));
        }
        Ok(Self {
            name,
            cron: cron_expr.to_string(),
            next_run: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Take the re-entrancy guard, or None if a run is already in flight.
    fn try_begin(&self) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then(|| RunningGuard {
                flag: self.running.clone(),
            })
    }
}

/// Released on drop, including on panic, so a crashed run can never wedge
/// its job permanently.
struct RunningGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct Inner {
    dispatcher: Arc<BatchDispatcher>,
    broadcaster: Arc<Broadcaster>,
    cfg: SchedulerConfig,
    started: AtomicBool,
    /// Bumped on every start so a stale check loop from a previous
    /// start/stop cycle exits instead of double-ticking.
    generation: AtomicU64,
    drip: Job,
    daily: Job,
    weekly: Job,
}

impl Inner {
    fn job(&self, kind: JobKind) -> &Job {
        match kind {
            JobKind::Drip => &self.drip,
            JobKind::Daily => &self.daily,
            JobKind::Weekly => &self.weekly,
        }
    }

    /// One pass of the check loop: spawn every job whose schedule has come
    /// due and advance its next-run time.
    fn tick(self: &Arc<Self>, now: DateTime<Utc>) {
        for kind in [JobKind::Drip, JobKind::Daily, JobKind::Weekly] {
            let job = self.job(kind);
            let due = {
                let mut next = job.next_run.lock().unwrap();
                match *next {
                    Some(t) if t <= now => {
                        *next = cron::next_run_from_cron(&job.cron, now);
                        true
                    }
                    _ => false,
                }
            };
            if due {
                let inner = self.clone();
                tokio::spawn(async move {
                    inner.run_job(kind).await;
                });
            }
        }
    }

    /// Run one job to completion, honoring its re-entrancy guard. All
    /// internal errors are caught and logged here — a failing run must
    /// never deregister the trigger.
    async fn run_job(self: &Arc<Self>, kind: JobKind) {
        let job = self.job(kind);
        let Some(_guard) = job.try_begin() else {
            tracing::warn!(
                "⚠️ Previous '{}' run still in flight, skipping this tick",
                job.name
            );
            return;
        };
        tracing::debug!("🔔 Trigger fired: '{}'", job.name);
        match kind {
            JobKind::Drip => {
                if let Err(e) = self.dispatcher.run(self.cfg.drip_batch_size).await {
                    tracing::error!("Drip dispatch run failed: {e}");
                }
            }
            JobKind::Daily => {
                if let Err(e) = self.broadcaster.run_daily().await {
                    tracing::error!("Daily broadcast run failed: {e}");
                }
            }
            JobKind::Weekly => {
                if let Err(e) = self.broadcaster.run_weekly().await {
                    tracing::error!("Weekly broadcast run failed: {e}");
                }
            }
        }
    }
}

/// The periodic trigger mechanism driving drip dispatch and broadcasts.
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler. Cron expressions are validated here; a bad one
    /// is a startup-fatal configuration error.
    pub fn new(
        dispatcher: Arc<BatchDispatcher>,
        broadcaster: Arc<Broadcaster>,
        cfg: SchedulerConfig,
    ) -> Result<Self> {
        let drip = Job::new("drip-dispatch", &cfg.drip_cron)?;
        let daily = Job::new("daily-broadcast", &cfg.daily_cron)?;
        let weekly = Job::new("weekly-broadcast", &cfg.weekly_cron)?;
        Ok(Self {
            inner: Arc::new(Inner {
                dispatcher,
                broadcaster,
                cfg,
                started: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                drip,
                daily,
                weekly,
            }),
        })
    }

    /// Start the check loop. Starting twice is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Scheduler already started");
            return;
        }
        let my_gen = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let now = Utc::now();
        for kind in [JobKind::Drip, JobKind::Daily, JobKind::Weekly] {
            let job = self.inner.job(kind);
            *job.next_run.lock().unwrap() = cron::next_run_from_cron(&job.cron, now);
        }

        let inner = self.inner.clone();
        let check_every = self.inner.cfg.check_interval_secs.max(1);
        tokio::spawn(async move {
            tracing::info!("⏰ Scheduler started (check every {check_every}s)");
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(check_every));
            loop {
                interval.tick().await;
                if !inner.started.load(Ordering::SeqCst)
                    || inner.generation.load(Ordering::SeqCst) != my_gen
                {
                    break;
                }
                inner.tick(Utc::now());
            }
            tracing::info!("⏰ Scheduler stopped");
        });
    }

    /// Halt future ticks. Idempotent; an in-flight job run completes.
    pub fn stop(&self) {
        if self.inner.started.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopping scheduler");
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Run a drip dispatch pass immediately, without waiting for the
    /// schedule. Returns `None` if a pass is already in flight (the
    /// re-entrancy guard applies to on-demand runs too).
    pub async fn run_drip_now(&self, batch_size: Option<usize>) -> Result<Option<DispatchSummary>> {
        let Some(_guard) = self.inner.drip.try_begin() else {
            tracing::warn!("Drip dispatch already running, on-demand run skipped");
            return Ok(None);
        };
        let batch = batch_size.unwrap_or(self.inner.cfg.drip_batch_size);
        self.inner.dispatcher.run(batch).await.map(Some)
    }

    /// Run the daily broadcast immediately.
    pub async fn run_daily_now(&self) -> Result<Option<BroadcastSummary>> {
        let Some(_guard) = self.inner.daily.try_begin() else {
            tracing::warn!("Daily broadcast already running, on-demand run skipped");
            return Ok(None);
        };
        self.inner.broadcaster.run_daily().await.map(Some)
    }

    /// Run the weekly broadcast immediately.
    pub async fn run_weekly_now(&self) -> Result<Option<BroadcastSummary>> {
        let Some(_guard) = self.inner.weekly.try_begin() else {
            tracing::warn!("Weekly broadcast already running, on-demand run skipped");
            return Ok(None);
        };
        self.inner.broadcaster.run_weekly().await.map(Some)
    }
}
