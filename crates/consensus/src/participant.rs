//! Participant node - votes on transactions and applies decided outcomes
//!
//! Each transaction id has its own mutex inside a `DashMap`, so messages for
//! different transactions never wait on each other. Every vote and decision
//! is appended to the log before the reply leaves this module.

use crate::error::ParticipantError;
use crate::retry::{RetryPolicy, TerminationMode};
use crate::termination::OutcomeSource;
use crate::transport::MessageHandler;
use crate::types::{FaultConfig, ParticipantStats, ParticipantStatus};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tpc_protocol::{
    Data, HistoryRecord, Message, MessageType, Outcome, ParticipantState, StateReport, Vote,
    VotePhase,
};
use tpc_txlog::{replay_log, CommittedStore, LogEntry, Phase, TransactionLog};

type Result<T> = std::result::Result<T, ParticipantError>;

/// Local decision on whether a transaction can be applied
pub trait AdmissionCheck: Send + Sync {
    fn check(&self, transaction_id: &str, payload: &Data) -> Vote;
}

/// Accepts any transaction carrying a non-empty payload
pub struct NonEmptyPayload;

impl AdmissionCheck for NonEmptyPayload {
    fn check(&self, _transaction_id: &str, payload: &Data) -> Vote {
        Vote::from_bool(!payload.is_empty())
    }
}

struct ParticipantTx {
    state: ParticipantState,
    payload: Data,
    can_commit_vote: Option<Vote>,
    pre_commit_vote: Option<Vote>,
    /// Last message from the coordinator about this transaction
    last_contact: Instant,
}

impl ParticipantTx {
    fn new() -> Self {
        Self {
            state: ParticipantState::Idle,
            payload: Data::new(),
            can_commit_vote: None,
            pre_commit_vote: None,
            last_contact: Instant::now(),
        }
    }

    fn report(&self) -> StateReport {
        let report = StateReport::new(self.state);
        if self.state == ParticipantState::Committed {
            report.with_payload(self.payload.clone())
        } else {
            report
        }
    }
}

/// Participant side of the protocol
pub struct Participant {
    id: String,
    log: Arc<dyn TransactionLog>,
    store: CommittedStore,
    transactions: DashMap<String, Arc<Mutex<ParticipantTx>>>,
    admission: Box<dyn AdmissionCheck>,
    faults: RwLock<FaultConfig>,
    crashed: AtomicBool,
    policy: RetryPolicy,
    stats: RwLock<ParticipantStats>,
}

impl Participant {
    /// Create a participant with the default admission check and policy
    pub fn new(id: impl Into<String>, log: Arc<dyn TransactionLog>) -> Self {
        Self {
            id: id.into(),
            log,
            store: CommittedStore::new(),
            transactions: DashMap::new(),
            admission: Box::new(NonEmptyPayload),
            faults: RwLock::new(FaultConfig::default()),
            crashed: AtomicBool::new(false),
            policy: RetryPolicy::default(),
            stats: RwLock::new(ParticipantStats::default()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_admission(mut self, admission: impl AdmissionCheck + 'static) -> Self {
        self.admission = Box::new(admission);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Handle one protocol message and produce the reply
    pub fn handle_message(&self, msg: Message) -> Result<Message> {
        if self.is_crashed() {
            return Err(ParticipantError::Crashed(self.id.clone()));
        }

        let failed = self.inject_failure();
        if failed && msg.msg_type != MessageType::CanCommit {
            self.stats.write().dropped += 1;
            return Err(ParticipantError::Dropped(msg.transaction_id));
        }

        tracing::debug!(
            "Participant {} received {} for {}",
            self.id,
            msg.msg_type,
            msg.transaction_id
        );

        let txid = msg.transaction_id.clone();
        match msg.msg_type {
            MessageType::CanCommit => Ok(self.on_can_commit(&txid, msg.data, failed)),
            MessageType::PreCommit => Ok(self.on_pre_commit(&txid)),
            MessageType::DoCommit => self.on_do_commit(&txid),
            MessageType::Abort => self.on_abort(&txid),
            MessageType::QueryState => Ok(self.state_response(&txid)),
            other => Err(ParticipantError::UnexpectedMessage(other)),
        }
    }

    fn on_can_commit(&self, txid: &str, payload: Data, failed: bool) -> Message {
        let slot = self
            .transactions
            .entry(txid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ParticipantTx::new())))
            .clone();
        let mut tx = slot.lock();
        tx.last_contact = Instant::now();

        match (tx.state, tx.can_commit_vote) {
            (ParticipantState::Idle, _) => {}
            (ParticipantState::CanCommitPending, Some(vote))
            | (ParticipantState::Aborted, Some(vote @ Vote::No)) => {
                return Message::vote_reply(VotePhase::CanCommit, txid, vote);
            }
            _ => return Message::state_response(txid, &tx.report()),
        }

        let mut vote = if failed {
            Vote::No
        } else {
            self.fault_vote(txid, VotePhase::CanCommit)
                .unwrap_or_else(|| self.admission.check(txid, &payload))
        };

        let entry = LogEntry::new(txid, Phase::CanCommit).with_vote(vote);
        match vote {
            Vote::Yes => {
                if let Err(e) = self.log.append(&entry.with_payload(payload.clone())) {
                    tracing::error!("Participant {} failed to log vote for {}: {}", self.id, txid, e);
                    vote = Vote::No;
                }
            }
            Vote::No => {
                if let Err(e) = self.log.append(&entry) {
                    tracing::warn!("Participant {} failed to log no vote for {}: {}", self.id, txid, e);
                }
            }
        }

        tx.can_commit_vote = Some(vote);
        let mut stats = self.stats.write();
        if vote.is_yes() {
            tx.state = ParticipantState::CanCommitPending;
            tx.payload = payload;
            stats.votes_yes += 1;
        } else {
            tx.state = ParticipantState::Aborted;
            stats.votes_no += 1;
            stats.aborted += 1;
        }

        tracing::info!("Participant {} voted {} on CanCommit for {}", self.id, vote, txid);
        Message::vote_reply(VotePhase::CanCommit, txid, vote)
    }

    fn on_pre_commit(&self, txid: &str) -> Message {
        let Some(slot) = self.slot(txid) else {
            return Message::state_response(txid, &StateReport::new(ParticipantState::Idle));
        };
        let mut tx = slot.lock();
        tx.last_contact = Instant::now();

        match (tx.state, tx.pre_commit_vote) {
            (ParticipantState::PreCommitPending | ParticipantState::Recovering, _) => {
                tx.state = ParticipantState::PreCommitPending;
                return Message::vote_reply(VotePhase::PreCommit, txid, Vote::Yes);
            }
            (ParticipantState::Aborted, Some(vote @ Vote::No)) => {
                return Message::vote_reply(VotePhase::PreCommit, txid, vote);
            }
            (ParticipantState::CanCommitPending, _) => {}
            _ => return Message::state_response(txid, &tx.report()),
        }

        let vote = if self.fault_vote(txid, VotePhase::PreCommit) == Some(Vote::No) {
            Vote::No
        } else {
            let prepared = LogEntry::new(txid, Phase::PreCommit)
                .with_vote(Vote::Yes)
                .with_payload(tx.payload.clone());
            match self.log.append(&prepared) {
                Ok(()) => Vote::Yes,
                Err(e) => {
                    tracing::error!("Participant {} failed to prepare {}: {}", self.id, txid, e);
                    Vote::No
                }
            }
        };

        tx.pre_commit_vote = Some(vote);
        if vote.is_yes() {
            tx.state = ParticipantState::PreCommitPending;
            self.stats.write().votes_yes += 1;
        } else {
            let refused = LogEntry::new(txid, Phase::PreCommit).with_vote(Vote::No);
            if let Err(e) = self.log.append(&refused) {
                tracing::warn!("Participant {} failed to log no vote for {}: {}", self.id, txid, e);
            }
            if let Err(e) = self.log_decision(txid, Outcome::Aborted, Data::new()) {
                tracing::warn!("Participant {} failed to log abort for {}: {}", self.id, txid, e);
            }
            tx.state = ParticipantState::Aborted;
            tx.payload.clear();
            let mut stats = self.stats.write();
            stats.votes_no += 1;
            stats.aborted += 1;
        }

        tracing::info!("Participant {} voted {} on PreCommit for {}", self.id, vote, txid);
        Message::vote_reply(VotePhase::PreCommit, txid, vote)
    }

    fn on_do_commit(&self, txid: &str) -> Result<Message> {
        let Some(slot) = self.slot(txid) else {
            return Ok(Message::state_response(txid, &StateReport::new(ParticipantState::Idle)));
        };
        let mut tx = slot.lock();
        tx.last_contact = Instant::now();

        match tx.state {
            ParticipantState::Committed => Ok(Message::ack_commit(txid)),
            ParticipantState::PreCommitPending | ParticipantState::Recovering => {
                self.commit_locked(txid, &mut tx)?;
                Ok(Message::ack_commit(txid))
            }
            _ => Ok(Message::state_response(txid, &tx.report())),
        }
    }

    fn on_abort(&self, txid: &str) -> Result<Message> {
        // an ABORT for an unseen id is recorded so a late CanCommit is refused
        let slot = self
            .transactions
            .entry(txid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ParticipantTx::new())))
            .clone();
        let mut tx = slot.lock();
        tx.last_contact = Instant::now();

        match tx.state {
            ParticipantState::Aborted => Ok(Message::ack_abort(txid)),
            ParticipantState::Committed => Ok(Message::state_response(txid, &tx.report())),
            _ => {
                self.abort_locked(txid, &mut tx)?;
                Ok(Message::ack_abort(txid))
            }
        }
    }

    fn commit_locked(&self, txid: &str, tx: &mut ParticipantTx) -> Result<()> {
        self.log_decision(txid, Outcome::Committed, tx.payload.clone())?;
        self.store.apply(txid, tx.payload.clone(), chrono::Utc::now().timestamp_millis());
        tx.state = ParticipantState::Committed;
        self.stats.write().committed += 1;
        tracing::info!("Participant {} committed {}", self.id, txid);
        Ok(())
    }

    fn abort_locked(&self, txid: &str, tx: &mut ParticipantTx) -> Result<()> {
        self.log_decision(txid, Outcome::Aborted, Data::new())?;
        tx.state = ParticipantState::Aborted;
        tx.payload.clear();
        self.stats.write().aborted += 1;
        tracing::info!("Participant {} aborted {}", self.id, txid);
        Ok(())
    }

    fn log_decision(&self, txid: &str, outcome: Outcome, payload: Data) -> Result<()> {
        let entry = LogEntry::new(txid, Phase::Decided)
            .with_outcome(outcome)
            .with_payload(payload);
        self.log.append(&entry)?;
        Ok(())
    }

    fn state_response(&self, txid: &str) -> Message {
        let report = match self.slot(txid) {
            Some(slot) => slot.lock().report(),
            None => StateReport::new(ParticipantState::Idle),
        };
        Message::state_response(txid, &report)
    }

    fn slot(&self, txid: &str) -> Option<Arc<Mutex<ParticipantTx>>> {
        self.transactions.get(txid).map(|r| r.value().clone())
    }

    fn slots(&self) -> Vec<(String, Arc<Mutex<ParticipantTx>>)> {
        self.transactions
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Vote imposed by fault injection: a per-transaction vote wins over the forced one
    fn fault_vote(&self, txid: &str, phase: VotePhase) -> Option<Vote> {
        let faults = self.faults.read();
        faults.manual_vote(txid, phase).or(faults.forced_vote)
    }

    fn inject_failure(&self) -> bool {
        let rate = self.faults.read().failure_rate;
        rate > 0.0 && rand::thread_rng().gen_bool(rate)
    }

    // -- termination --

    /// Unilaterally abort transactions stuck in CanCommitPending past the wait timeout
    ///
    /// No participant can have committed while this one has not prepared.
    pub fn expire_waiting(&self) -> Vec<String> {
        let mut expired = Vec::new();
        for (txid, slot) in self.slots() {
            let mut tx = slot.lock();
            if tx.state != ParticipantState::CanCommitPending
                || tx.last_contact.elapsed() < self.policy.wait_timeout
            {
                continue;
            }
            match self.abort_locked(&txid, &mut tx) {
                Ok(()) => {
                    tracing::warn!(
                        "Participant {} aborted {} after {:?} without PreCommit",
                        self.id,
                        txid,
                        self.policy.wait_timeout
                    );
                    self.stats.write().unilateral_aborts += 1;
                    expired.push(txid);
                }
                Err(e) => tracing::error!("Participant {} could not expire {}: {}", self.id, txid, e),
            }
        }
        expired
    }

    /// Prepared transactions whose outcome is unknown and overdue
    pub fn blocked(&self) -> Vec<String> {
        self.slots()
            .into_iter()
            .filter(|(_, slot)| {
                let tx = slot.lock();
                match tx.state {
                    ParticipantState::Recovering => true,
                    ParticipantState::PreCommitPending => {
                        tx.last_contact.elapsed() >= self.policy.wait_timeout
                    }
                    _ => false,
                }
            })
            .map(|(txid, _)| txid)
            .collect()
    }

    /// Ask outcome sources about blocked transactions and adopt any terminal answer
    ///
    /// Does nothing under `TerminationMode::Block`.
    pub async fn resolve_blocked(&self, sources: &[Arc<dyn OutcomeSource>]) -> Vec<(String, Outcome)> {
        if self.policy.termination == TerminationMode::Block || self.is_crashed() {
            return Vec::new();
        }

        let mut resolved = Vec::new();
        for txid in self.blocked() {
            for source in sources {
                match source.outcome(&txid).await {
                    Ok(outcome) if outcome.is_final() => {
                        match self.apply_outcome(&txid, outcome) {
                            Ok(true) => {
                                tracing::info!(
                                    "Participant {} learned {} for {} from {}",
                                    self.id,
                                    outcome,
                                    txid,
                                    source.name()
                                );
                                resolved.push((txid.clone(), outcome));
                            }
                            Ok(false) => {}
                            Err(e) => tracing::error!("Participant {} could not apply {}: {}", self.id, txid, e),
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("{} could not answer for {}: {}", source.name(), txid, e),
                }
            }
        }
        resolved
    }

    /// Adopt a decided outcome learned outside the normal message flow
    ///
    /// Returns true if local state changed.
    pub fn apply_outcome(&self, txid: &str, outcome: Outcome) -> Result<bool> {
        let Some(slot) = self.slot(txid) else {
            return Ok(false);
        };
        let mut tx = slot.lock();

        match (tx.state, outcome) {
            (ParticipantState::PreCommitPending | ParticipantState::Recovering, Outcome::Committed) => {
                self.commit_locked(txid, &mut tx)?;
            }
            (state, Outcome::Aborted) if !state.is_terminal() => {
                self.abort_locked(txid, &mut tx)?;
            }
            (state, Outcome::Committed | Outcome::Aborted) if state.outcome() != outcome => {
                tracing::error!(
                    "Participant {} holds {} for {} but was told {}",
                    self.id,
                    state,
                    txid,
                    outcome
                );
                return Ok(false);
            }
            _ => return Ok(false),
        }

        self.stats.write().adopted_outcomes += 1;
        Ok(true)
    }

    /// Converge local state with the coordinator's decided history
    pub fn apply_history(&self, records: &[HistoryRecord]) -> usize {
        records
            .iter()
            .filter(|record| match self.apply_outcome(&record.transaction_id, record.outcome) {
                Ok(changed) => changed,
                Err(e) => {
                    tracing::error!(
                        "Participant {} could not apply history for {}: {}",
                        self.id,
                        record.transaction_id,
                        e
                    );
                    false
                }
            })
            .count()
    }

    // -- crash & recovery --

    /// Simulate a crash: drop volatile state and ignore all messages
    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        self.transactions.clear();
        self.store.clear();
        tracing::warn!("Participant {} crashed", self.id);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Rebuild state from the log and resume handling messages
    ///
    /// Returns the number of transactions whose outcome is still in doubt.
    pub fn recover(&self) -> Result<usize> {
        let replayed = replay_log(self.log.as_ref())?;
        self.transactions.clear();
        self.store.clear();

        let mut in_doubt = 0;
        for record in &replayed {
            let state = match record.outcome {
                Outcome::Committed => ParticipantState::Committed,
                Outcome::Aborted => ParticipantState::Aborted,
                Outcome::Unknown => match (record.pre_commit_vote, record.can_commit_vote) {
                    (Some(Vote::Yes), _) => ParticipantState::Recovering,
                    (None, Some(Vote::Yes)) => ParticipantState::CanCommitPending,
                    _ => ParticipantState::Aborted,
                },
            };

            if state == ParticipantState::Committed {
                self.store
                    .apply(&record.transaction_id, record.payload.clone(), record.updated_at);
            }
            if state == ParticipantState::Recovering {
                in_doubt += 1;
            }

            let tx = ParticipantTx {
                state,
                payload: if state == ParticipantState::Aborted {
                    Data::new()
                } else {
                    record.payload.clone()
                },
                can_commit_vote: record.can_commit_vote,
                pre_commit_vote: record.pre_commit_vote,
                last_contact: Instant::now(),
            };
            self.transactions
                .insert(record.transaction_id.clone(), Arc::new(Mutex::new(tx)));
        }

        self.crashed.store(false, Ordering::SeqCst);
        tracing::info!(
            "Participant {} recovered {} transactions ({} in doubt)",
            self.id,
            replayed.len(),
            in_doubt
        );
        Ok(in_doubt)
    }

    // -- inspection & fault injection --

    pub fn state(&self, txid: &str) -> ParticipantState {
        self.slot(txid)
            .map(|slot| slot.lock().state)
            .unwrap_or_default()
    }

    /// Payloads of every committed transaction
    pub fn committed_data(&self) -> BTreeMap<String, Data> {
        self.store.snapshot()
    }

    pub fn status(&self) -> ParticipantStatus {
        let transactions = self
            .slots()
            .into_iter()
            .map(|(txid, slot)| (txid, slot.lock().state))
            .filter(|(_, state)| *state != ParticipantState::Idle)
            .collect();

        ParticipantStatus {
            id: self.id.clone(),
            crashed: self.is_crashed(),
            faults: self.faults.read().clone(),
            transactions,
            stats: self.stats.read().clone(),
        }
    }

    pub fn faults(&self) -> FaultConfig {
        self.faults.read().clone()
    }

    /// Replace the whole fault configuration
    pub fn set_faults(&self, mut faults: FaultConfig) {
        faults.failure_rate = clamp_rate(faults.failure_rate);
        *self.faults.write() = faults;
    }

    pub fn set_forced_vote(&self, vote: Option<Vote>) {
        self.faults.write().forced_vote = vote;
    }

    /// Pin the vote this participant casts for one transaction in one phase
    ///
    /// `None` removes the pin.
    pub fn set_manual_vote(&self, txid: &str, phase: VotePhase, vote: Option<Vote>) {
        self.faults.write().set_manual_vote(txid, phase, vote);
    }

    pub fn set_failure_rate(&self, rate: f64) {
        self.faults.write().failure_rate = clamp_rate(rate);
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() {
        rate.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl MessageHandler for Participant {
    fn handle(&self, msg: Message) -> Option<Message> {
        match self.handle_message(msg) {
            Ok(reply) => Some(reply),
            Err(e @ (ParticipantError::Crashed(_) | ParticipantError::Dropped(_))) => {
                tracing::debug!("{}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Participant {} produced no reply: {}", self.id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tpc_txlog::MemoryLog;

    fn payload() -> Data {
        let mut data = Data::new();
        data.insert("key".into(), json!("value"));
        data
    }

    fn participant() -> (Participant, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::new());
        (Participant::new("P1", log.clone()), log)
    }

    fn prepared(p: &Participant, txid: &str) {
        p.handle_message(Message::can_commit(txid, payload())).unwrap();
        p.handle_message(Message::pre_commit(txid)).unwrap();
    }

    #[test]
    fn happy_path_commits_and_applies() {
        let (p, log) = participant();

        let reply = p.handle_message(Message::can_commit("t1", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteYes);
        assert_eq!(p.state("t1"), ParticipantState::CanCommitPending);

        let reply = p.handle_message(Message::pre_commit("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteYes);

        let reply = p.handle_message(Message::do_commit("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::AckCommit);
        assert_eq!(p.state("t1"), ParticipantState::Committed);
        assert_eq!(p.committed_data().get("t1"), Some(&payload()));

        let phases: Vec<Phase> = log.entries("t1").unwrap().iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![Phase::CanCommit, Phase::PreCommit, Phase::Decided]);
    }

    #[test]
    fn empty_payload_votes_no() {
        let (p, _) = participant();
        let reply = p.handle_message(Message::can_commit("t1", Data::new())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteNo);
        assert_eq!(p.state("t1"), ParticipantState::Aborted);

        // duplicate CanCommit gets the same vote back
        let reply = p.handle_message(Message::can_commit("t1", Data::new())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteNo);
    }

    #[test]
    fn duplicates_are_idempotent() {
        let (p, log) = participant();
        prepared(&p, "t1");
        let before = log.len();

        let reply = p.handle_message(Message::pre_commit("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteYes);
        assert_eq!(log.len(), before);

        p.handle_message(Message::do_commit("t1")).unwrap();
        let after_commit = log.len();
        let reply = p.handle_message(Message::do_commit("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::AckCommit);
        assert_eq!(log.len(), after_commit);

        // a PreCommit refused because prepare could not be logged is refused again
        p.handle_message(Message::can_commit("t2", payload())).unwrap();
        log.set_failing_phase(Some(Phase::PreCommit));
        let reply = p.handle_message(Message::pre_commit("t2")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteNo);
        log.set_failing_phase(None);

        let after_refusal = log.len();
        let reply = p.handle_message(Message::pre_commit("t2")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteNo);
        assert_eq!(log.len(), after_refusal);
        assert_eq!(p.state("t2"), ParticipantState::Aborted);
    }

    #[test]
    fn manual_votes_apply_per_transaction() {
        let (p, _) = participant();
        p.set_forced_vote(Some(Vote::No));
        p.set_manual_vote("pinned", VotePhase::CanCommit, Some(Vote::Yes));
        p.set_manual_vote("pinned", VotePhase::PreCommit, Some(Vote::No));

        let reply = p.handle_message(Message::can_commit("other", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteNo);

        let reply = p.handle_message(Message::can_commit("pinned", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteYes);
        let reply = p.handle_message(Message::pre_commit("pinned")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteNo);

        // the refusal survives a restart and is replayed to a retried PreCommit
        p.crash();
        p.recover().unwrap();
        assert_eq!(p.state("pinned"), ParticipantState::Aborted);
        let reply = p.handle_message(Message::pre_commit("pinned")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteNo);
    }

    #[test]
    fn unexpected_phase_reports_state() {
        let (p, _) = participant();

        let reply = p.handle_message(Message::do_commit("unknown")).unwrap();
        assert_eq!(reply.msg_type, MessageType::StateResponse);
        assert_eq!(reply.state_report().unwrap().state, ParticipantState::Idle);

        p.handle_message(Message::can_commit("t1", payload())).unwrap();
        let reply = p.handle_message(Message::do_commit("t1")).unwrap();
        assert_eq!(
            reply.state_report().unwrap().state,
            ParticipantState::CanCommitPending
        );
        assert!(p.committed_data().is_empty());
    }

    #[test]
    fn abort_discards_prepared_data() {
        let (p, _) = participant();
        prepared(&p, "t1");

        let reply = p.handle_message(Message::abort("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::AckAbort);
        assert_eq!(p.state("t1"), ParticipantState::Aborted);

        // no phase-advance after abort
        let reply = p.handle_message(Message::do_commit("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::StateResponse);
        assert!(p.committed_data().is_empty());

        let reply = p.handle_message(Message::abort("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::AckAbort);
    }

    #[test]
    fn abort_before_can_commit_refuses_late_vote() {
        let (p, _) = participant();
        let reply = p.handle_message(Message::abort("t1")).unwrap();
        assert_eq!(reply.msg_type, MessageType::AckAbort);

        let reply = p.handle_message(Message::can_commit("t1", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::StateResponse);
        assert_eq!(reply.state_report().unwrap().outcome, Outcome::Aborted);
    }

    #[test]
    fn log_failure_votes_no() {
        let (p, log) = participant();
        log.set_failing_phase(Some(Phase::CanCommit));
        let reply = p.handle_message(Message::can_commit("t1", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteNo);

        log.set_failing_phase(Some(Phase::PreCommit));
        p.handle_message(Message::can_commit("t2", payload())).unwrap();
        let reply = p.handle_message(Message::pre_commit("t2")).unwrap();
        assert_eq!(reply.msg_type, MessageType::PreCommitVoteNo);
        assert_eq!(p.state("t2"), ParticipantState::Aborted);
    }

    #[test]
    fn commit_log_failure_withholds_ack() {
        let (p, log) = participant();
        prepared(&p, "t1");
        log.set_failing_phase(Some(Phase::Decided));

        assert!(matches!(
            p.handle_message(Message::do_commit("t1")),
            Err(ParticipantError::Log(_))
        ));
        assert_eq!(p.state("t1"), ParticipantState::PreCommitPending);
    }

    #[test]
    fn forced_vote_and_crash() {
        let (p, _) = participant();
        p.set_forced_vote(Some(Vote::No));
        let reply = p.handle_message(Message::can_commit("t1", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteNo);

        p.crash();
        assert!(matches!(
            p.handle_message(Message::query_state("t1")),
            Err(ParticipantError::Crashed(_))
        ));
        assert!(p.handle(Message::query_state("t1")).is_none());
    }

    #[test]
    fn full_failure_rate_drops_everything_but_votes() {
        let (p, _) = participant();
        p.set_failure_rate(1.0);

        let reply = p.handle_message(Message::can_commit("t1", payload())).unwrap();
        assert_eq!(reply.msg_type, MessageType::CanCommitVoteNo);
        assert!(matches!(
            p.handle_message(Message::query_state("t1")),
            Err(ParticipantError::Dropped(_))
        ));

        p.set_failure_rate(7.5);
        assert_eq!(p.faults().failure_rate, 1.0);
    }

    #[test]
    fn recovery_restores_states() {
        let log = Arc::new(MemoryLog::new());
        let p = Participant::new("P1", log.clone());

        p.handle_message(Message::can_commit("waiting", payload())).unwrap();
        prepared(&p, "prepared");
        prepared(&p, "done");
        p.handle_message(Message::do_commit("done")).unwrap();
        p.handle_message(Message::can_commit("refused", Data::new())).unwrap();

        p.crash();
        assert!(p.committed_data().is_empty());

        let in_doubt = p.recover().unwrap();
        assert_eq!(in_doubt, 1);
        assert_eq!(p.state("waiting"), ParticipantState::CanCommitPending);
        assert_eq!(p.state("prepared"), ParticipantState::Recovering);
        assert_eq!(p.state("done"), ParticipantState::Committed);
        assert_eq!(p.state("refused"), ParticipantState::Aborted);
        assert_eq!(p.committed_data().get("done"), Some(&payload()));

        // a recovering participant completes on the decision
        let reply = p.handle_message(Message::do_commit("prepared")).unwrap();
        assert_eq!(reply.msg_type, MessageType::AckCommit);
    }

    #[test]
    fn history_converges_in_doubt_transactions() {
        let (p, _) = participant();
        prepared(&p, "t1");
        prepared(&p, "t2");

        let history = vec![
            HistoryRecord {
                transaction_id: "t1".into(),
                outcome: Outcome::Committed,
                payload: payload(),
                timestamp: 1,
            },
            HistoryRecord {
                transaction_id: "t2".into(),
                outcome: Outcome::Aborted,
                payload: Data::new(),
                timestamp: 2,
            },
            HistoryRecord {
                transaction_id: "unseen".into(),
                outcome: Outcome::Committed,
                payload: Data::new(),
                timestamp: 3,
            },
        ];

        assert_eq!(p.apply_history(&history), 2);
        assert_eq!(p.state("t1"), ParticipantState::Committed);
        assert_eq!(p.state("t2"), ParticipantState::Aborted);
        assert_eq!(p.state("unseen"), ParticipantState::Idle);
        assert_eq!(p.apply_history(&history), 0);
    }

    #[test]
    fn waiting_transactions_expire() {
        let log = Arc::new(MemoryLog::new());
        let policy = RetryPolicy {
            wait_timeout: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let p = Participant::new("P1", log).with_policy(policy);

        p.handle_message(Message::can_commit("t1", payload())).unwrap();
        prepared(&p, "t2");

        assert_eq!(p.expire_waiting(), vec!["t1".to_string()]);
        assert_eq!(p.state("t1"), ParticipantState::Aborted);
        // prepared transactions are never expired unilaterally
        assert_eq!(p.state("t2"), ParticipantState::PreCommitPending);
        assert_eq!(p.blocked(), vec!["t2".to_string()]);
    }

    struct Fixed(Outcome);

    #[async_trait]
    impl OutcomeSource for Fixed {
        fn name(&self) -> String {
            "fixed".into()
        }

        async fn outcome(&self, _transaction_id: &str) -> std::result::Result<Outcome, TransportError> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn termination_mode_controls_resolution() {
        let policy = RetryPolicy {
            wait_timeout: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let sources: Vec<Arc<dyn OutcomeSource>> =
            vec![
            Arc::new(Fixed(Outcome::Unknown)) as Arc<dyn OutcomeSource>,
            Arc::new(Fixed(Outcome::Committed)),
        ];

        let blocking = Participant::new("P1", Arc::new(MemoryLog::new())).with_policy(policy.clone());
        prepared(&blocking, "t1");
        assert!(blocking.resolve_blocked(&sources).await.is_empty());
        assert_eq!(blocking.state("t1"), ParticipantState::PreCommitPending);

        let cooperative = Participant::new("P2", Arc::new(MemoryLog::new()))
            .with_policy(policy.with_termination(TerminationMode::Cooperative));
        prepared(&cooperative, "t1");
        let resolved = cooperative.resolve_blocked(&sources).await;
        assert_eq!(resolved, vec![("t1".to_string(), Outcome::Committed)]);
        assert_eq!(cooperative.state("t1"), ParticipantState::Committed);
    }
}
