//! The always-running sync loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tokio::time::MissedTickBehavior;

use super::Syncer;

/// What a qualifying tick should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    /// Set at the top of the hour: prune old videos and inactive users too.
    pub maintenance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Armed,
    /// Fired during this wall-clock minute.
    Fired { minute: u32 },
}

/// Fires once per qualifying wall-clock minute.
///
/// A minute qualifies when it is a multiple of `every_minutes`. After firing
/// the trigger stays quiet until the minute changes, so the several ticks
/// that land inside one qualifying minute start a single pass.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    every_minutes: u32,
    state: TriggerState,
}

impl Trigger {
    pub fn new(every_minutes: u32) -> Self {
        Self {
            every_minutes: every_minutes.max(1),
            state: TriggerState::Armed,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn observe(&mut self, minute: u32) -> Option<Pass> {
        if let TriggerState::Fired { minute: fired_at } = self.state {
            if fired_at == minute {
                return None;
            }
            self.state = TriggerState::Armed;
        }

        if minute % self.every_minutes != 0 {
            return None;
        }

        self.state = TriggerState::Fired { minute };
        Some(Pass {
            maintenance: minute == 0,
        })
    }
}

/// Runs a startup pass, then checks the UTC minute every `tick`. Never returns.
pub async fn run(syncer: Arc<Syncer>, tick: Duration, every_minutes: u32) {
    tracing::info!(
        "Sync scheduler started (tick {:?}, every {} minutes)",
        tick,
        every_minutes
    );
    syncer.full_pass().await;

    let mut trigger = Trigger::new(every_minutes);
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;

        let Some(pass) = trigger.observe(Utc::now().minute()) else {
            continue;
        };

        if pass.maintenance {
            syncer.maintenance().await;
        }
        syncer.full_pass().await;
    }
}
