//! Time and sun trigger scheduler
//!
//! Polls the clock on a short interval and fires time/sun triggers that
//! have come due. A fired (automation, trigger, target) combination is
//! remembered for the rest of the day so coarse ticking can never
//! double-fire, and the memory resets at day rollover.

use crate::engine::AutomationEngine;
use crate::sun::Location;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use dashmap::DashSet;
use hearth_automation::{AutomationManager, Trigger};
use hearth_core::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Default polling interval
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// How long past its target a trigger is still considered due. Covers
/// tick jitter without resurrecting long-gone targets after a restart.
const FIRE_WINDOW_SECS: i64 = 60;

/// A trigger that has come due
#[derive(Debug, Clone)]
pub struct DueTrigger {
    pub automation_id: String,
    pub trigger_index: usize,
}

/// Scheduler for time-of-day and sun triggers
pub struct Scheduler {
    manager: Arc<AutomationManager>,
    clock: Arc<dyn Clock>,
    location: Location,
    tick_interval: Duration,

    /// (automation id, trigger index, target key) already fired today
    fired: DashSet<(String, usize, String)>,
    current_day: Mutex<Option<NaiveDate>>,
}

impl Scheduler {
    pub fn new(manager: Arc<AutomationManager>, clock: Arc<dyn Clock>, location: Location) -> Self {
        Self {
            manager,
            clock,
            location,
            tick_interval: DEFAULT_TICK_INTERVAL,
            fired: DashSet::new(),
            current_day: Mutex::new(None),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Run the polling loop, handing due triggers to the engine.
    pub fn start(self: Arc<Self>, engine: Arc<AutomationEngine>) -> JoinHandle<()> {
        let interval = self.tick_interval;
        tokio::spawn(async move {
            info!(?interval, "scheduler started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                for due in self.tick() {
                    let Some(automation) = self.manager.get(&due.automation_id) else {
                        continue;
                    };
                    let Some(trigger) = automation.triggers.get(due.trigger_index) else {
                        continue;
                    };
                    engine.fire_scheduled(&due.automation_id, trigger).await;
                }
            }
        })
    }

    /// One scheduling pass against the current clock. Public so tests
    /// can drive simulated days without sleeping.
    pub fn tick(&self) -> Vec<DueTrigger> {
        let now = self.clock.now();
        self.roll_day(now.date_naive());

        let mut due = Vec::new();
        for automation in self.manager.all() {
            if !automation.enabled {
                continue;
            }

            for (index, trigger) in automation.triggers.iter().enumerate() {
                let target = match trigger {
                    Trigger::Time(t) => now.date_naive().and_time(t.at).and_utc(),
                    Trigger::Sun(t) => {
                        let Some(event_time) =
                            self.location.sun_event(now.date_naive(), t.event)
                        else {
                            // Polar day/night: nothing to fire today
                            continue;
                        };
                        event_time + t.offset.unwrap_or_else(chrono::Duration::zero)
                    }
                    Trigger::State(_) => continue,
                };

                if !is_due(now, target) {
                    continue;
                }

                let key = (
                    automation.id.clone(),
                    index,
                    format!("{:02}:{:02}", target.hour(), target.minute()),
                );
                if !self.fired.insert(key) {
                    trace!(automation_id = %automation.id, "already fired for this target");
                    continue;
                }

                debug!(
                    automation_id = %automation.id,
                    trigger = index,
                    %target,
                    "trigger due"
                );
                due.push(DueTrigger {
                    automation_id: automation.id.clone(),
                    trigger_index: index,
                });
            }
        }
        due
    }

    /// Dedup entries currently held; bounded by today's fired triggers.
    pub fn dedup_entries(&self) -> usize {
        self.fired.len()
    }

    fn roll_day(&self, today: NaiveDate) {
        let mut current = self.current_day.lock().unwrap();
        if *current != Some(today) {
            if current.is_some() {
                debug!(%today, "day rollover, clearing fired set");
            }
            self.fired.clear();
            *current = Some(today);
        }
    }
}

fn is_due(now: DateTime<Utc>, target: DateTime<Utc>) -> bool {
    let delta = (now - target).num_seconds();
    (0..FIRE_WINDOW_SECS).contains(&delta)
}
