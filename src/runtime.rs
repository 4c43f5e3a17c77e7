//! Timer-driven runtime for one challenge instance.
//!
//! Two independent loops per instance: a 1s clock tick that re-projects the
//! phase and drives the settlement step, and a slower price poll that feeds
//! the tracker. The network calls are the only suspension points and each
//! lives on its own task, so a slow fetch or submission never blocks the
//! clock. Teardown aborts both tasks; a response that would have landed
//! after teardown has no task left to run on.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ledger::XpLedger;
use crate::models::{Challenge, Config, Direction, PriceReading};
use crate::phase::{phase_of, Phase};
use crate::price::{PriceSource, PriceTracker};
use crate::settlement::{ResultSink, SettlementOrchestrator};
use crate::store::ChallengeStore;

/// Read-side projection of one instance for display or polling callers.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeStatus {
    pub challenge_key: String,
    pub phase: Phase,
    /// Seconds until the deadline, floored at zero.
    pub seconds_remaining: i64,
    pub reading: PriceReading,
    pub picked: bool,
    pub settled: bool,
}

pub struct ChallengeRuntime {
    orchestrator: Arc<SettlementOrchestrator>,
    tracker: Arc<PriceTracker>,
    store: Arc<ChallengeStore>,
    clock_task: JoinHandle<()>,
    price_task: JoinHandle<()>,
}

impl ChallengeRuntime {
    /// Wire one instance together and start its loops.
    pub fn spawn(
        challenge: Challenge,
        config: &Config,
        store: Arc<ChallengeStore>,
        ledger: Arc<XpLedger>,
        source: Arc<dyn PriceSource>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let tracker = Arc::new(PriceTracker::new(
            &challenge.ticker,
            &challenge.challenge_key,
            store.clone(),
        )?);

        let orchestrator = Arc::new(SettlementOrchestrator::new(
            challenge.clone(),
            config.user_id.clone(),
            store.clone(),
            ledger,
            tracker.clone(),
            sink,
        ));

        info!(
            challenge_key = %challenge.challenge_key,
            symbol = tracker.symbol(),
            deadline = %challenge.deadline,
            "challenge runtime started"
        );

        let clock_task = tokio::spawn(clock_loop(
            orchestrator.clone(),
            store.clone(),
            config.clock_tick_secs,
        ));
        let price_task = tokio::spawn(price_loop(
            tracker.clone(),
            challenge.clone(),
            source,
            config.price_poll_secs,
        ));

        Ok(Self {
            orchestrator,
            tracker,
            store,
            clock_task,
            price_task,
        })
    }

    /// Submit the user's pick for this round at the current instant.
    pub async fn submit_pick(&self, direction: Direction, confidence: u8) -> Result<bool> {
        self.orchestrator
            .submit_pick(direction, confidence, Utc::now())
            .await
    }

    pub fn status(&self) -> Result<ChallengeStatus> {
        let challenge = self.orchestrator.challenge();
        let now = Utc::now();

        Ok(ChallengeStatus {
            challenge_key: challenge.challenge_key.clone(),
            phase: phase_of(now, challenge.deadline, challenge.refresh_by),
            seconds_remaining: (challenge.deadline - now).num_seconds().max(0),
            reading: self.tracker.latest_reading(),
            picked: self.store.get_pick(&challenge.challenge_key)?.is_some(),
            settled: self.store.result_posted(&challenge.challenge_key)?,
        })
    }

    /// Cancel both loops. In-flight requests are dropped with their tasks
    /// and can no longer mutate any state.
    pub fn shutdown(&self) {
        self.clock_task.abort();
        self.price_task.abort();
    }
}

impl Drop for ChallengeRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn clock_loop(
    orchestrator: Arc<SettlementOrchestrator>,
    store: Arc<ChallengeStore>,
    tick_secs: u64,
) {
    let mut tick = interval(Duration::from_secs(tick_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let key = orchestrator.challenge().challenge_key.clone();

    loop {
        tick.tick().await;
        let now = Utc::now();

        match orchestrator.step(now).await {
            Ok(Some(record)) => {
                info!(
                    challenge_key = %key,
                    xp = record.xp_awarded,
                    "round settled; clock loop exiting"
                );
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(challenge_key = %key, error = %e, "settlement step failed");
            }
        }

        // A closed round that was settled earlier (e.g. before a restart) or
        // that never received a pick will never settle; stop ticking.
        let challenge = orchestrator.challenge();
        if phase_of(now, challenge.deadline, challenge.refresh_by) == Phase::Closed {
            let done = match (store.result_posted(&key), store.get_pick(&key)) {
                (Ok(posted), Ok(pick)) => posted || pick.is_none(),
                _ => false,
            };
            if done {
                debug!(challenge_key = %key, "nothing left to settle; clock loop exiting");
                return;
            }
        }
    }
}

async fn price_loop(
    tracker: Arc<PriceTracker>,
    challenge: Challenge,
    source: Arc<dyn PriceSource>,
    poll_secs: u64,
) {
    let mut tick = interval(Duration::from_secs(poll_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        tracker.poll_once(source.as_ref()).await;

        // No more readings are needed once the round is closed.
        if phase_of(Utc::now(), challenge.deadline, challenge.refresh_by) == Phase::Closed {
            debug!(
                challenge_key = %challenge.challenge_key,
                "round closed; price loop exiting"
            );
            return;
        }
    }
}
