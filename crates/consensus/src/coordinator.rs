//! Coordinator node - drives transactions through CanCommit, PreCommit and DoCommit
//!
//! Every transaction runs in its own tokio task. Each phase transition is
//! appended to the log before the phase's messages are sent, so a restarted
//! coordinator can pick up exactly where the log says it was.

use crate::error::{CoordinatorError, Result, TransportError};
use crate::registry::{ParticipantRecord, ParticipantRegistry};
use crate::retry::RetryPolicy;
use crate::termination::OutcomeSource;
use crate::transport::{MessageHandler, Transport};
use crate::types::{CoordinatorStats, TransactionSnapshot, VoteRecord};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tpc_protocol::{
    non_scalar_field, Data, HistoryRecord, Message, MessageType, Outcome, ParticipantState, StateReport, Vote,
    VotePhase,
};
use tpc_txlog::{replay_log, LogEntry, Phase, ReplayedTransaction, TransactionLog};

/// Where a transaction task starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    /// New transaction, nothing logged yet
    Fresh,
    /// Re-run the CanCommit round
    CanCommit,
    /// Ask participants what they know, then re-run PreCommit if nobody decided
    PreCommit,
    /// Outcome already logged, deliver it
    Deliver,
}

struct TxInner {
    phase: Phase,
    outcome: Outcome,
    votes: BTreeMap<String, VoteRecord>,
    /// Participants that have not acknowledged the decision
    pending: BTreeSet<String>,
    decided_at: Option<i64>,
    delivering: bool,
}

struct TransactionRecord {
    id: String,
    payload: Data,
    participants: Vec<String>,
    created_at: i64,
    inner: RwLock<TxInner>,
    outcome_tx: watch::Sender<Outcome>,
}

impl TransactionRecord {
    fn new(id: String, payload: Data, participants: Vec<String>, created_at: i64) -> Self {
        let (outcome_tx, _) = watch::channel(Outcome::Unknown);
        Self {
            id,
            payload,
            participants,
            created_at,
            inner: RwLock::new(TxInner {
                phase: Phase::Started,
                outcome: Outcome::Unknown,
                votes: BTreeMap::new(),
                pending: BTreeSet::new(),
                decided_at: None,
                delivering: false,
            }),
            outcome_tx,
        }
    }

    fn outcome(&self) -> Outcome {
        self.inner.read().outcome
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.write().phase = phase;
    }

    /// Publish a decision; the first decision wins
    fn decide(&self, outcome: Outcome, decided_at: i64) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.outcome.is_final() {
                return false;
            }
            inner.outcome = outcome;
            inner.phase = Phase::Decided;
            inner.decided_at = Some(decided_at);
            inner.pending = self.participants.iter().cloned().collect();
        }
        self.outcome_tx.send_replace(outcome);
        true
    }

    fn snapshot(&self) -> TransactionSnapshot {
        let inner = self.inner.read();
        TransactionSnapshot {
            transaction_id: self.id.clone(),
            outcome: inner.outcome,
            phase: inner.phase,
            participants: self.participants.clone(),
            votes: inner.votes.clone(),
            pending: inner.pending.iter().cloned().collect(),
            created_at: self.created_at,
            decided_at: inner.decided_at,
        }
    }

    fn history(&self) -> HistoryRecord {
        let inner = self.inner.read();
        HistoryRecord {
            transaction_id: self.id.clone(),
            outcome: inner.outcome,
            payload: self.payload.clone(),
            timestamp: inner.decided_at.unwrap_or(self.created_at),
        }
    }
}

/// Coordinator side of the protocol
pub struct Coordinator {
    id: String,
    log: Arc<dyn TransactionLog>,
    registry: Arc<ParticipantRegistry>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    transactions: DashMap<String, Arc<TransactionRecord>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    crashed: AtomicBool,
    stats: RwLock<CoordinatorStats>,
    me: Weak<Coordinator>,
}

impl Coordinator {
    pub fn new(
        id: impl Into<String>,
        log: Arc<dyn TransactionLog>,
        registry: Arc<ParticipantRegistry>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Arc<Self> {
        let id = id.into();
        Arc::new_cyclic(|me| Self {
            id,
            log,
            registry,
            transport,
            policy,
            transactions: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            crashed: AtomicBool::new(false),
            stats: RwLock::new(CoordinatorStats::default()),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<ParticipantRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a transaction under a freshly generated id
    pub fn start_transaction(&self, payload: Data) -> Result<String> {
        loop {
            let id = generate_transaction_id();
            match self.start_transaction_with_id(&id, payload.clone()) {
                Err(CoordinatorError::DuplicateTransaction(_)) => continue,
                result => return result,
            }
        }
    }

    /// Start a transaction under a caller-chosen id
    pub fn start_transaction_with_id(&self, id: &str, payload: Data) -> Result<String> {
        if self.is_crashed() {
            return Err(CoordinatorError::Crashed);
        }
        if let Some(field) = non_scalar_field(&payload) {
            return Err(CoordinatorError::InvalidPayload(field.to_string()));
        }
        if self.log.contains(id)? {
            return Err(CoordinatorError::DuplicateTransaction(id.to_string()));
        }

        let record = match self.transactions.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(CoordinatorError::DuplicateTransaction(id.to_string()))
            }
            Entry::Vacant(slot) => {
                let record = Arc::new(TransactionRecord::new(
                    id.to_string(),
                    payload,
                    self.registry.ids(),
                    chrono::Utc::now().timestamp_millis(),
                ));
                slot.insert(record.clone());
                record
            }
        };

        self.stats.write().transactions_started += 1;
        tracing::info!(
            "Starting transaction {} with {} participants",
            id,
            record.participants.len()
        );
        self.spawn_task(record, Resume::Fresh);
        Ok(id.to_string())
    }

    /// Outcome of a transaction known to this coordinator
    pub fn get_status(&self, id: &str) -> Result<Outcome> {
        self.record(id)
            .map(|r| r.outcome())
            .ok_or_else(|| CoordinatorError::TransactionNotFound(id.to_string()))
    }

    pub fn transaction(&self, id: &str) -> Option<TransactionSnapshot> {
        self.record(id).map(|r| r.snapshot())
    }

    /// Snapshot of every known transaction, oldest first
    pub fn transactions(&self) -> Vec<TransactionSnapshot> {
        let mut all: Vec<_> = self.records().iter().map(|r| r.snapshot()).collect();
        all.sort_by(|a, b| {
            (a.created_at, &a.transaction_id).cmp(&(b.created_at, &b.transaction_id))
        });
        all
    }

    /// Wait until a transaction reaches a terminal outcome
    pub async fn wait_for_outcome(&self, id: &str) -> Result<Outcome> {
        let mut rx = self
            .record(id)
            .ok_or_else(|| CoordinatorError::TransactionNotFound(id.to_string()))?
            .outcome_tx
            .subscribe();
        let outcome = rx
            .wait_for(|o| o.is_final())
            .await
            .map_err(|_| CoordinatorError::Crashed)?;
        Ok(*outcome)
    }

    /// Every known transaction with its submitted payload, in decision order
    ///
    /// Undecided transactions report `unknown` and sort by creation time.
    pub fn list_history(&self) -> Vec<HistoryRecord> {
        let mut history: Vec<_> = self.records().iter().map(|r| r.history()).collect();
        history.sort_by(|a, b| {
            (a.timestamp, &a.transaction_id).cmp(&(b.timestamp, &b.transaction_id))
        });
        history
    }

    /// The decided part of the history, as sent to participants
    pub fn decided_history(&self) -> Vec<HistoryRecord> {
        self.list_history()
            .into_iter()
            .filter(|record| record.outcome.is_final())
            .collect()
    }

    pub fn participants(&self) -> Vec<ParticipantRecord> {
        self.registry.records()
    }

    /// Register (or re-register) a participant and push it any pending decisions
    pub fn register(&self, id: &str, address: &str) {
        self.registry.register(id, address);
        self.redeliver_pending();
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.read().clone()
    }

    /// Resend decisions that some participant has not acknowledged yet
    ///
    /// Returns the number of transactions scheduled for redelivery.
    pub fn redeliver_pending(&self) -> usize {
        if self.is_crashed() {
            return 0;
        }

        let mut scheduled = 0;
        for record in self.records() {
            let ready = {
                let mut inner = record.inner.write();
                let ready = inner.outcome.is_final() && !inner.pending.is_empty() && !inner.delivering;
                if ready {
                    inner.delivering = true;
                }
                ready
            };
            if ready {
                scheduled += 1;
                self.stats.write().redeliveries += 1;
                self.spawn_delivery(record);
            }
        }
        scheduled
    }

    // -- crash & recovery --

    /// Simulate a crash: stop every task and forget all in-memory state
    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.transactions.clear();
        tracing::warn!("Coordinator {} crashed", self.id);
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Rebuild the transaction table from the log and resume unfinished work
    ///
    /// Returns the number of transactions resumed.
    pub fn recover(&self) -> Result<usize> {
        let replayed = replay_log(self.log.as_ref())?;
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.transactions.clear();
        self.crashed.store(false, Ordering::SeqCst);

        let mut resumed = 0;
        for tx in replayed {
            let (record, resume) = self.restore(tx);
            self.transactions.insert(record.id.clone(), record.clone());
            if let Some(resume) = resume {
                resumed += 1;
                if resume == Resume::Deliver {
                    record.inner.write().delivering = true;
                }
                self.spawn_task(record, resume);
            }
        }

        self.stats.write().recovered += resumed as u64;
        tracing::info!(
            "Coordinator {} recovered {} transactions, resuming {}",
            self.id,
            self.transactions.len(),
            resumed
        );
        Ok(resumed)
    }

    fn restore(&self, tx: ReplayedTransaction) -> (Arc<TransactionRecord>, Option<Resume>) {
        // The set fixed at creation; the registry only stands in when no start was logged
        let participants = tx.participants.unwrap_or_else(|| self.registry.ids());
        let record = Arc::new(TransactionRecord::new(
            tx.transaction_id,
            tx.payload,
            participants,
            tx.started_at,
        ));

        let resume = if tx.outcome.is_final() {
            record.decide(tx.outcome, tx.updated_at);
            if tx.phase == Phase::Finished {
                let mut inner = record.inner.write();
                inner.phase = Phase::Finished;
                inner.pending.clear();
                None
            } else {
                Some(Resume::Deliver)
            }
        } else {
            record.set_phase(tx.phase);
            match tx.phase {
                Phase::PreCommit => Some(Resume::PreCommit),
                _ => Some(Resume::CanCommit),
            }
        };
        (record, resume)
    }

    // -- protocol driver --

    fn spawn_task(&self, record: Arc<TransactionRecord>, resume: Resume) {
        let Some(coordinator) = self.me.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            coordinator.drive(record, resume).await;
        });
        self.track(handle);
    }

    fn spawn_delivery(&self, record: Arc<TransactionRecord>) {
        let Some(coordinator) = self.me.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            coordinator.deliver(&record).await;
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn drive(&self, record: Arc<TransactionRecord>, resume: Resume) {
        if resume == Resume::Deliver {
            self.deliver(&record).await;
            return;
        }

        let outcome = self.run_voting(&record, resume).await;
        self.decide(&record, outcome);
        self.deliver(&record).await;
    }

    /// Run the voting rounds and return the decision they lead to
    async fn run_voting(&self, record: &TransactionRecord, resume: Resume) -> Outcome {
        let txid = record.id.as_str();

        if resume == Resume::Fresh {
            let started = LogEntry::new(txid, Phase::Started)
                .with_payload(record.payload.clone())
                .with_participants(record.participants.clone());
            if let Err(e) = self.log.append(&started) {
                tracing::error!("Failed to log start of {}: {}", txid, e);
                return Outcome::Aborted;
            }
        }

        if record.participants.is_empty() {
            tracing::warn!("Transaction {} has no participants, aborting", txid);
            return Outcome::Aborted;
        }

        if resume == Resume::PreCommit {
            let known = self.query_participants(record).await;
            if known.is_final() {
                tracing::info!("Transaction {} already {} at a participant", txid, known);
                return known;
            }
        } else if !self
            .run_phase(record, VotePhase::CanCommit, Message::can_commit(txid, record.payload.clone()))
            .await
        {
            return Outcome::Aborted;
        }

        if !self
            .run_phase(record, VotePhase::PreCommit, Message::pre_commit(txid))
            .await
        {
            return Outcome::Aborted;
        }

        Outcome::Committed
    }

    /// Log the phase, send its message to every participant and collect votes
    ///
    /// Returns true only on a unanimous yes before the phase deadline.
    async fn run_phase(&self, record: &TransactionRecord, phase: VotePhase, msg: Message) -> bool {
        let txid = record.id.as_str();
        let log_phase = match phase {
            VotePhase::CanCommit => Phase::CanCommit,
            VotePhase::PreCommit => Phase::PreCommit,
        };
        if let Err(e) = self.log.append(&LogEntry::new(txid, log_phase)) {
            tracing::error!("Failed to log {} for {}: {}", phase, txid, e);
            return false;
        }
        record.set_phase(log_phase);
        tracing::info!("Transaction {} entering {}", txid, phase);

        let mut replies: FuturesUnordered<_> = record
            .participants
            .iter()
            .map(|pid| self.exchange(pid, msg.clone()))
            .collect();

        let deadline = tokio::time::sleep(self.policy.phase_timeout);
        tokio::pin!(deadline);

        let mut yes = 0;
        while yes < record.participants.len() {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(
                        "Transaction {} timed out in {} with {}/{} votes",
                        txid,
                        phase,
                        yes,
                        record.participants.len()
                    );
                    return false;
                }
                next = replies.next() => {
                    let Some((pid, reply)) = next else {
                        break;
                    };
                    let vote = classify_vote(phase, &reply);
                    record
                        .inner
                        .write()
                        .votes
                        .entry(pid.clone())
                        .or_default()
                        .set(phase, vote);

                    match (&reply, vote) {
                        (_, Vote::Yes) => yes += 1,
                        (Err(e), Vote::No) => {
                            tracing::warn!("Participant {} failed {} for {}: {}", pid, phase, txid, e);
                            return false;
                        }
                        (Ok(_), Vote::No) => {
                            tracing::info!("Participant {} voted no on {} for {}", pid, phase, txid);
                            return false;
                        }
                    }
                }
            }
        }

        yes == record.participants.len()
    }

    /// Ask every participant for its state during recovery
    async fn query_participants(&self, record: &TransactionRecord) -> Outcome {
        let mut replies: FuturesUnordered<_> = record
            .participants
            .iter()
            .map(|pid| self.exchange(pid, Message::query_state(&record.id)))
            .collect();

        let deadline = tokio::time::sleep(self.policy.phase_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return Outcome::Unknown,
                next = replies.next() => match next {
                    None => return Outcome::Unknown,
                    Some((_, Ok(reply))) => {
                        let outcome = reply
                            .state_report()
                            .map(|report| report.outcome)
                            .unwrap_or_default();
                        if outcome.is_final() {
                            return outcome;
                        }
                    }
                    Some((pid, Err(e))) => {
                        tracing::debug!("State query to {} failed: {}", pid, e);
                    }
                }
            }
        }
    }

    /// Log and publish the decision
    ///
    /// A commit that cannot be logged becomes an abort.
    fn decide(&self, record: &TransactionRecord, outcome: Outcome) {
        let txid = record.id.as_str();
        let mut outcome = outcome;

        let entry = |o: Outcome| {
            LogEntry::new(txid, Phase::Decided)
                .with_outcome(o)
                .with_payload(record.payload.clone())
        };
        if let Err(e) = self.log.append(&entry(outcome)) {
            tracing::error!("Failed to log {} decision for {}: {}", outcome, txid, e);
            if outcome == Outcome::Committed {
                outcome = Outcome::Aborted;
                if let Err(e) = self.log.append(&entry(outcome)) {
                    tracing::error!("Failed to log fallback abort for {}: {}", txid, e);
                }
            }
        }

        if record.decide(outcome, chrono::Utc::now().timestamp_millis()) {
            record.inner.write().delivering = true;
            let mut stats = self.stats.write();
            match outcome {
                Outcome::Committed => stats.committed += 1,
                _ => stats.aborted += 1,
            }
            tracing::info!("Transaction {} decided: {}", txid, outcome);
        }
    }

    /// Deliver the decision to every pending participant until acknowledged
    /// or out of retries
    async fn deliver(&self, record: &TransactionRecord) {
        let outcome = record.outcome();
        let pending: Vec<String> = record.inner.read().pending.iter().cloned().collect();

        let deliveries: FuturesUnordered<_> = pending
            .iter()
            .map(|pid| self.deliver_to(record, pid, outcome))
            .collect();
        let acked: Vec<(String, bool)> = deliveries.collect().await;

        let finished = {
            let mut inner = record.inner.write();
            for (pid, ok) in &acked {
                if *ok {
                    inner.pending.remove(pid);
                }
            }
            inner.delivering = false;
            inner.pending.is_empty()
        };

        if !finished {
            return;
        }
        match self.log.append(&LogEntry::new(&record.id, Phase::Finished)) {
            Ok(()) => {
                record.set_phase(Phase::Finished);
                tracing::debug!("Transaction {} finished", record.id);
            }
            Err(e) => tracing::error!("Failed to log completion of {}: {}", record.id, e),
        }
    }

    async fn deliver_to(&self, record: &TransactionRecord, pid: &str, outcome: Outcome) -> (String, bool) {
        let msg = match outcome {
            Outcome::Committed => Message::do_commit(&record.id),
            _ => Message::abort(&record.id),
        };

        for attempt in 0..=self.policy.max_redeliveries {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
            }

            let result = tokio::time::timeout(self.policy.ack_timeout, self.exchange(pid, msg.clone())).await;
            match result {
                Ok((_, Ok(reply))) if is_ack(outcome, &reply) => {
                    self.registry.record_ack(pid, &record.id, Phase::Decided);
                    tracing::debug!("Participant {} acknowledged {} for {}", pid, outcome, record.id);
                    return (pid.to_string(), true);
                }
                Ok((_, Ok(reply))) => {
                    tracing::warn!(
                        "Participant {} answered {} to the {} decision for {}",
                        pid,
                        reply.msg_type,
                        outcome,
                        record.id
                    );
                }
                Ok((_, Err(e))) => {
                    tracing::debug!("Delivery of {} to {} failed: {}", record.id, pid, e);
                }
                Err(_) => {
                    tracing::debug!("Delivery of {} to {} timed out", record.id, pid);
                }
            }
        }

        self.registry.mark_unreachable(pid, &record.id);
        tracing::warn!(
            "Participant {} unreachable for {} after {} attempts, will redeliver later",
            pid,
            record.id,
            self.policy.max_redeliveries + 1
        );
        (pid.to_string(), false)
    }

    /// One request/response exchange with a registered participant
    async fn exchange(&self, pid: &str, msg: Message) -> (String, std::result::Result<Message, TransportError>) {
        let reply = match self.registry.get(pid) {
            Some(participant) => self.transport.send(&participant, msg).await,
            None => Err(TransportError::Unreachable(pid.to_string())),
        };
        (pid.to_string(), reply)
    }

    fn record(&self, id: &str) -> Option<Arc<TransactionRecord>> {
        self.transactions.get(id).map(|r| r.value().clone())
    }

    fn records(&self) -> Vec<Arc<TransactionRecord>> {
        self.transactions.iter().map(|r| r.value().clone()).collect()
    }

    // -- participant-initiated messages --

    /// Answer a message sent to the coordinator by a participant
    pub fn handle_message(&self, msg: Message) -> Option<Message> {
        if self.is_crashed() {
            return None;
        }

        match msg.msg_type {
            MessageType::RequestHistory => {
                let history = self.decided_history();
                tracing::debug!(
                    "Sending {} history records to {}",
                    history.len(),
                    msg.data_str("participant_id").unwrap_or("unknown")
                );
                Some(Message::history_response(&history))
            }
            MessageType::QueryState => {
                let report = self.state_report(&msg.transaction_id);
                Some(Message::state_response(&msg.transaction_id, &report))
            }
            MessageType::Register => {
                let (Some(pid), Some(address)) = (msg.data_str("participant_id"), msg.data_str("address")) else {
                    tracing::warn!("REGISTER without participant_id or address");
                    return None;
                };
                self.register(pid, address);
                Some(Message::registered(pid))
            }
            other => {
                tracing::warn!("Coordinator ignoring {} for {}", other, msg.transaction_id);
                None
            }
        }
    }

    fn state_report(&self, id: &str) -> StateReport {
        let Some(record) = self.record(id) else {
            return StateReport::new(ParticipantState::Idle);
        };
        let inner = record.inner.read();
        let state = match inner.outcome {
            Outcome::Committed => ParticipantState::Committed,
            Outcome::Aborted => ParticipantState::Aborted,
            Outcome::Unknown if inner.phase >= Phase::PreCommit => ParticipantState::PreCommitPending,
            Outcome::Unknown => ParticipantState::CanCommitPending,
        };
        StateReport::new(state)
    }
}

impl MessageHandler for Coordinator {
    fn handle(&self, msg: Message) -> Option<Message> {
        self.handle_message(msg)
    }
}

#[async_trait]
impl OutcomeSource for Coordinator {
    fn name(&self) -> String {
        format!("coordinator {}", self.id)
    }

    async fn outcome(&self, transaction_id: &str) -> std::result::Result<Outcome, TransportError> {
        if self.is_crashed() {
            return Err(TransportError::NoReply(self.id.clone()));
        }
        Ok(self.get_status(transaction_id).unwrap_or_default())
    }
}

/// Turn a reply (or its absence) into a vote for `phase`
///
/// Anything other than an explicit yes, or a state that required one, is a no.
fn classify_vote(phase: VotePhase, reply: &std::result::Result<Message, TransportError>) -> Vote {
    let Ok(reply) = reply else {
        return Vote::No;
    };
    if let Some((voted_phase, vote)) = reply.vote() {
        return if voted_phase == phase { vote } else { Vote::No };
    }
    match reply.state_report() {
        Ok(report) => Vote::from_bool(report.state.implies_yes(phase)),
        Err(_) => Vote::No,
    }
}

fn is_ack(outcome: Outcome, reply: &Message) -> bool {
    match (outcome, reply.msg_type) {
        (Outcome::Committed, MessageType::AckCommit) => true,
        (Outcome::Aborted, MessageType::AckAbort) => true,
        (_, MessageType::StateResponse) => match reply.state_report() {
            Ok(report) => match outcome {
                Outcome::Committed => report.state == ParticipantState::Committed,
                _ => matches!(report.state, ParticipantState::Aborted | ParticipantState::Idle),
            },
            Err(_) => false,
        },
        _ => false,
    }
}

/// Eight hex characters
fn generate_transaction_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_responses_count_as_votes() {
        let prepared = Message::state_response("t", &StateReport::new(ParticipantState::PreCommitPending));
        assert_eq!(classify_vote(VotePhase::CanCommit, &Ok(prepared.clone())), Vote::Yes);
        assert_eq!(classify_vote(VotePhase::PreCommit, &Ok(prepared)), Vote::Yes);

        let aborted = Message::state_response("t", &StateReport::new(ParticipantState::Aborted));
        assert_eq!(classify_vote(VotePhase::CanCommit, &Ok(aborted)), Vote::No);

        let wrong_phase = Message::vote_reply(VotePhase::CanCommit, "t", Vote::Yes);
        assert_eq!(classify_vote(VotePhase::PreCommit, &Ok(wrong_phase)), Vote::No);

        let lost = Err(TransportError::NoReply("P1".into()));
        assert_eq!(classify_vote(VotePhase::CanCommit, &lost), Vote::No);
    }

    #[test]
    fn idle_participants_acknowledge_aborts_only() {
        let idle = Message::state_response("t", &StateReport::new(ParticipantState::Idle));
        assert!(is_ack(Outcome::Aborted, &idle));
        assert!(!is_ack(Outcome::Committed, &idle));
        assert!(is_ack(Outcome::Committed, &Message::ack_commit("t")));
        assert!(!is_ack(Outcome::Committed, &Message::ack_abort("t")));
    }

    #[test]
    fn generated_ids_are_eight_hex_chars() {
        let id = generate_transaction_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
