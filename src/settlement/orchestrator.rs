//! Settlement orchestrator for one challenge instance.
//!
//! Driven by the clock tick: once the phase projects to `Closed` and a pick
//! exists, the round is resolved, scored, credited locally, and submitted to
//! the Result Sink exactly once. Idempotency layers, checked in order before
//! any await point:
//!
//! 1. the durable posted flag (survives restarts, the ground truth);
//! 2. the in-flight claim, which stops overlapping ticks from racing a slow
//!    submission;
//! 3. the cached settlement: a failed submission retries the same outcome
//!    and XP on the next tick instead of re-resolving and re-crediting.
//!
//! A failed submission leaves the flag unset and the local XP credit in
//! place; local XP and remote durability are intentionally decoupled.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ledger::XpLedger;
use crate::models::{Challenge, Direction, Pick, SettlementRecord};
use crate::outcome::{resolve_outcome, ResolvedOutcome};
use crate::phase::{phase_of, Phase};
use crate::price::PriceTracker;
use crate::scoring::score;
use crate::settlement::sink::{PickSubmission, ResultSink, SettlementSubmission};
use crate::store::ChallengeStore;

#[derive(Debug, Clone, Copy)]
struct PendingSettlement {
    outcome: ResolvedOutcome,
    xp: u32,
}

pub struct SettlementOrchestrator {
    challenge: Challenge,
    user_id: String,
    store: Arc<ChallengeStore>,
    ledger: Arc<XpLedger>,
    tracker: Arc<PriceTracker>,
    sink: Arc<dyn ResultSink>,
    /// Claimed before the submission is dispatched so two overlapping ticks
    /// can never both decide to submit.
    in_flight: AtomicBool,
    /// Resolved outcome and credited XP, kept across failed submissions.
    pending: Mutex<Option<PendingSettlement>>,
}

impl SettlementOrchestrator {
    pub fn new(
        challenge: Challenge,
        user_id: String,
        store: Arc<ChallengeStore>,
        ledger: Arc<XpLedger>,
        tracker: Arc<PriceTracker>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            challenge,
            user_id,
            store,
            ledger,
            tracker,
            sink,
            in_flight: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// Accept the user's one-shot pick for this round. Refused once the
    /// phase has left `Open` or once a pick already exists for the key.
    /// The remote pick submission is fire-and-forget: a sink failure is
    /// logged and the locally stored pick stands.
    pub async fn submit_pick(
        &self,
        direction: Direction,
        confidence: u8,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let phase = phase_of(now, self.challenge.deadline, self.challenge.refresh_by);
        if phase != Phase::Open {
            debug!(
                challenge_key = %self.challenge.challenge_key,
                ?phase,
                "pick refused: round no longer open"
            );
            return Ok(false);
        }

        // A pick's stated confidence is bounded to [50, 90].
        let confidence = confidence.clamp(50, 90);

        let pick = Pick {
            direction,
            confidence,
            submitted_at: now,
        };

        if !self.store.put_pick(&self.challenge.challenge_key, &pick)? {
            debug!(
                challenge_key = %self.challenge.challenge_key,
                "pick refused: one already exists for this key"
            );
            return Ok(false);
        }

        info!(
            challenge_key = %self.challenge.challenge_key,
            direction = direction.as_str(),
            confidence,
            "pick accepted"
        );

        let submission = PickSubmission {
            user_id: self.user_id.clone(),
            ticker: self.challenge.ticker.clone(),
            direction,
            confidence,
            challenge_key: self.challenge.challenge_key.clone(),
            xp: 0,
        };
        if let Err(e) = self.sink.submit_pick(&submission).await {
            warn!(
                challenge_key = %self.challenge.challenge_key,
                error = %e,
                "pick submission to sink failed; local pick stands"
            );
        }

        Ok(true)
    }

    /// One settlement attempt, invoked from every clock tick. Returns the
    /// settlement record when this tick completed the round's submission.
    pub async fn step(&self, now: DateTime<Utc>) -> Result<Option<SettlementRecord>> {
        let key = &self.challenge.challenge_key;

        if phase_of(now, self.challenge.deadline, self.challenge.refresh_by) != Phase::Closed {
            return Ok(None);
        }
        if self.store.result_posted(key)? {
            return Ok(None);
        }
        let Some(pick) = self.store.get_pick(key)? else {
            return Ok(None);
        };

        // Claim before the first await point; an overlapping tick backs off.
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let result = self.settle(&pick, now).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn settle(&self, pick: &Pick, now: DateTime<Utc>) -> Result<Option<SettlementRecord>> {
        let key = &self.challenge.challenge_key;

        let pending = {
            let mut slot = self.pending.lock();
            match *slot {
                Some(pending) => pending,
                None => {
                    let reading = self.tracker.latest_reading();
                    let outcome = resolve_outcome(&reading);
                    let xp = score(pick, outcome.direction);

                    // Local credit happens exactly once, before the remote
                    // submission, and is not rolled back on failure.
                    self.ledger.add_xp(xp as i64)?;

                    info!(
                        challenge_key = %key,
                        outcome = outcome.direction.as_str(),
                        source = ?outcome.source,
                        xp,
                        "round resolved"
                    );

                    let pending = PendingSettlement { outcome, xp };
                    *slot = Some(pending);
                    pending
                }
            }
        };

        let submission = SettlementSubmission {
            user_id: self.user_id.clone(),
            challenge_key: key.clone(),
            outcome: pending.outcome.direction,
            xp_awarded: pending.xp,
            outcome_source: pending.outcome.source,
        };

        match self.sink.submit_settlement(&submission).await {
            Ok(()) => {
                self.store.mark_result_posted(key, now)?;
                info!(challenge_key = %key, "settlement posted");
                Ok(Some(SettlementRecord {
                    challenge_key: key.clone(),
                    user_id: self.user_id.clone(),
                    outcome: pending.outcome.direction,
                    xp_awarded: pending.xp,
                    posted_at: now,
                }))
            }
            Err(e) => {
                warn!(
                    challenge_key = %key,
                    error = %e,
                    "settlement submission failed; will retry next tick"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceQuote;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Notify;

    struct RecordingSink {
        settlements: Mutex<Vec<SettlementSubmission>>,
        picks: Mutex<Vec<PickSubmission>>,
        /// Fail this many settlement submissions before succeeding.
        fail_first: Mutex<u32>,
        /// When set, settlement submissions park until notified.
        gate: Option<Arc<Notify>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                settlements: Mutex::new(Vec::new()),
                picks: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
                gate: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                settlements: Mutex::new(Vec::new()),
                picks: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
                gate: Some(gate),
            })
        }

        fn failing(times: u32) -> Arc<Self> {
            let sink = Self::new();
            *sink.fail_first.lock() = times;
            sink
        }
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn submit_pick(&self, submission: &PickSubmission) -> Result<()> {
            self.picks.lock().push(submission.clone());
            Ok(())
        }

        async fn submit_settlement(&self, submission: &SettlementSubmission) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            {
                let mut fail = self.fail_first.lock();
                if *fail > 0 {
                    *fail -= 1;
                    anyhow::bail!("sink unavailable");
                }
            }
            self.settlements.lock().push(submission.clone());
            Ok(())
        }
    }

    struct Fixture {
        orchestrator: Arc<SettlementOrchestrator>,
        ledger: Arc<XpLedger>,
        store: Arc<ChallengeStore>,
        tracker: Arc<PriceTracker>,
        t0: DateTime<Utc>,
        deadline: DateTime<Utc>,
        refresh_by: DateTime<Utc>,
    }

    fn fixture(sink: Arc<dyn ResultSink>) -> Fixture {
        let t0 = DateTime::parse_from_rfc3339("2026-03-01T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let deadline = t0 + Duration::seconds(60);
        let refresh_by = deadline + Duration::seconds(30);

        let challenge = Challenge::new("BTC", "15m", deadline, Some(refresh_by));
        let store = Arc::new(ChallengeStore::in_memory().unwrap());
        let ledger = Arc::new(XpLedger::load(store.clone()).unwrap());
        let tracker = Arc::new(
            PriceTracker::new("BTC", &challenge.challenge_key, store.clone()).unwrap(),
        );

        let orchestrator = Arc::new(SettlementOrchestrator::new(
            challenge,
            "u1".to_string(),
            store.clone(),
            ledger.clone(),
            tracker.clone(),
            sink,
        ));

        Fixture {
            orchestrator,
            ledger,
            store,
            tracker,
            t0,
            deadline,
            refresh_by,
        }
    }

    fn quote(price: f64) -> PriceQuote {
        PriceQuote {
            price: Some(price),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn settles_once_with_real_outcome_and_flag() {
        let sink = RecordingSink::new();
        let f = fixture(sink.clone());

        assert!(f
            .orchestrator
            .submit_pick(Direction::Up, 85, f.t0)
            .await
            .unwrap());
        f.tracker.record_quote(&quote(100.0), f.t0);
        f.tracker.record_quote(&quote(100.5), f.deadline);

        let record = f.orchestrator.step(f.refresh_by).await.unwrap().unwrap();
        assert_eq!(record.outcome, Direction::Up);
        assert_eq!(record.xp_awarded, 11);
        assert_eq!(f.ledger.balance(), 11);
        assert!(f
            .store
            .result_posted(&f.orchestrator.challenge().challenge_key)
            .unwrap());

        // Later ticks are no-ops.
        assert!(f.orchestrator.step(f.refresh_by).await.unwrap().is_none());
        assert_eq!(sink.settlements.lock().len(), 1);
    }

    #[tokio::test]
    async fn does_nothing_before_close_or_without_a_pick() {
        let sink = RecordingSink::new();
        let f = fixture(sink.clone());

        // No pick yet, round closed: nothing to settle.
        assert!(f.orchestrator.step(f.refresh_by).await.unwrap().is_none());

        assert!(f
            .orchestrator
            .submit_pick(Direction::Up, 85, f.t0)
            .await
            .unwrap());

        // Picked, but round still open / settling.
        assert!(f.orchestrator.step(f.t0).await.unwrap().is_none());
        assert!(f.orchestrator.step(f.deadline).await.unwrap().is_none());
        assert!(sink.settlements.lock().is_empty());
    }

    #[tokio::test]
    async fn overlapping_ticks_credit_and_submit_once() {
        let gate = Arc::new(Notify::new());
        let sink = RecordingSink::gated(gate.clone());
        let f = fixture(sink.clone());

        f.orchestrator
            .submit_pick(Direction::Up, 85, f.t0)
            .await
            .unwrap();
        f.tracker.record_quote(&quote(100.0), f.t0);
        f.tracker.record_quote(&quote(100.5), f.deadline);

        // First tick parks inside the sink call.
        let first = {
            let orchestrator = f.orchestrator.clone();
            let at = f.refresh_by;
            tokio::spawn(async move { orchestrator.step(at).await })
        };
        tokio::task::yield_now().await;

        // Second tick arrives while the submission is in flight.
        assert!(f.orchestrator.step(f.refresh_by).await.unwrap().is_none());

        gate.notify_one();
        let record = first.await.unwrap().unwrap();
        assert!(record.is_some());

        assert_eq!(sink.settlements.lock().len(), 1);
        assert_eq!(f.ledger.balance(), 11);
    }

    #[tokio::test]
    async fn failed_submission_retries_without_double_credit() {
        let sink = RecordingSink::failing(1);
        let f = fixture(sink.clone());

        f.orchestrator
            .submit_pick(Direction::Down, 90, f.t0)
            .await
            .unwrap();
        f.tracker.record_quote(&quote(100.0), f.t0);
        f.tracker.record_quote(&quote(99.0), f.deadline);

        // First tick: XP credited, submission fails, flag stays unset.
        assert!(f.orchestrator.step(f.refresh_by).await.unwrap().is_none());
        assert_eq!(f.ledger.balance(), 12);
        assert!(!f
            .store
            .result_posted(&f.orchestrator.challenge().challenge_key)
            .unwrap());

        // Retry succeeds with the same outcome and no extra credit.
        let record = f.orchestrator.step(f.refresh_by).await.unwrap().unwrap();
        assert_eq!(record.outcome, Direction::Down);
        assert_eq!(record.xp_awarded, 12);
        assert_eq!(f.ledger.balance(), 12);
        assert_eq!(sink.settlements.lock().len(), 1);
    }

    #[tokio::test]
    async fn unpriced_round_settles_with_simulated_outcome() {
        let sink = RecordingSink::new();
        let f = fixture(sink.clone());

        f.orchestrator
            .submit_pick(Direction::Up, 50, f.t0)
            .await
            .unwrap();
        // No price was ever observed.

        let record = f.orchestrator.step(f.refresh_by).await.unwrap().unwrap();
        let submissions = sink.settlements.lock();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].outcome_source, crate::outcome::OutcomeSource::Simulated);
        assert_eq!(submissions[0].outcome, record.outcome);
    }

    #[tokio::test]
    async fn out_of_band_confidence_is_clamped() {
        let sink = RecordingSink::new();
        let f = fixture(sink.clone());

        assert!(f
            .orchestrator
            .submit_pick(Direction::Up, 99, f.t0)
            .await
            .unwrap());

        let key = &f.orchestrator.challenge().challenge_key;
        let stored = f.store.get_pick(key).unwrap().unwrap();
        assert_eq!(stored.confidence, 90);

        let picks = sink.picks.lock();
        assert_eq!(picks[0].confidence, 90);
    }

    #[tokio::test]
    async fn low_confidence_is_floored_at_the_band() {
        let sink = RecordingSink::new();
        let f = fixture(sink.clone());

        assert!(f
            .orchestrator
            .submit_pick(Direction::Down, 5, f.t0)
            .await
            .unwrap());

        let key = &f.orchestrator.challenge().challenge_key;
        let stored = f.store.get_pick(key).unwrap().unwrap();
        assert_eq!(stored.confidence, 50);
    }

    #[tokio::test]
    async fn pick_is_one_shot_and_phase_gated() {
        let sink = RecordingSink::new();
        let f = fixture(sink.clone());

        assert!(f
            .orchestrator
            .submit_pick(Direction::Up, 85, f.t0)
            .await
            .unwrap());
        // Second pick for the same key is refused.
        assert!(!f
            .orchestrator
            .submit_pick(Direction::Down, 50, f.t0)
            .await
            .unwrap());
        // Picks after the deadline are refused outright.
        assert!(!f
            .orchestrator
            .submit_pick(Direction::Down, 50, f.deadline)
            .await
            .unwrap());

        let picks = sink.picks.lock();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].xp, 0);
    }
}
