//! Execution log and progress streaming
//!
//! The execution log is the append-only audit trail for one plan: every step
//! transition is recorded in append order and never reordered or mutated.
//! Live subscribers receive entries over a broadcast channel; late or
//! restarted subscribers replay from an offset instead.
//!
//! Worker partial payloads travel over a separate [`ProgressBus`]: the
//! dispatcher awaits only a step's final outcome, while UI subscribers may
//! render chunks as they arrive.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Step transition recorded in the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    /// Step handed to a worker
    Dispatched,
    /// Outcome accepted, step complete
    Succeeded,
    /// Worker reported failure or missed its deadline
    Failed,
    /// Recovery decided on another attempt with the same worker
    Retried,
    /// Recovery decided on a fallback worker
    Reassigned,
    /// Outcome passed acceptance checks
    Validated,
    /// Outcome failed acceptance checks
    Rejected,
    /// Recovery exhausted, step terminally failed
    Aborted,
}

/// One audit-trail record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Plan this entry belongs to
    pub plan_id: Uuid,
    /// Step the transition applies to
    pub step_id: Uuid,
    /// Position in the plan's append sequence, starting at 0
    pub seq: u64,
    /// Wall-clock append time
    pub timestamp: DateTime<Utc>,
    /// Transition kind
    pub event: StepEvent,
    /// Context for the transition (error kind, rejection reason, decision)
    pub detail: String,
}

/// Append-only execution log for a single plan.
///
/// Appends preserve the real-time order of transitions across all steps of
/// the plan (single append sequence). Slow broadcast subscribers miss entries
/// rather than blocking the dispatcher; [`ExecutionLog::entries_from`]
/// replays from any offset.
#[derive(Debug)]
pub struct ExecutionLog {
    plan_id: Uuid,
    entries: RwLock<Vec<LogEntry>>,
    sender: broadcast::Sender<LogEntry>,
}

impl ExecutionLog {
    /// Create a log for one plan. `capacity` bounds the live broadcast
    /// buffer, not the stored entries.
    #[must_use]
    pub fn new(plan_id: Uuid, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            plan_id,
            entries: RwLock::new(Vec::new()),
            sender,
        }
    }

    /// Plan this log belongs to.
    #[must_use]
    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    /// Append one entry and fan it out to live subscribers.
    pub async fn append(
        &self,
        step_id: Uuid,
        event: StepEvent,
        detail: impl Into<String>,
    ) -> LogEntry {
        let mut entries = self.entries.write().await;
        let entry = LogEntry {
            plan_id: self.plan_id,
            step_id,
            seq: entries.len() as u64,
            timestamp: Utc::now(),
            event,
            detail: detail.into(),
        };
        entries.push(entry.clone());
        drop(entries);

        // send() errs when nobody is subscribed, which is fine
        let _ = self.sender.send(entry.clone());
        entry
    }

    /// All entries in append order.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }

    /// Entries from a sequence offset onward (restartable stream).
    pub async fn entries_from(&self, offset: u64) -> Vec<LogEntry> {
        let entries = self.entries.read().await;
        entries.iter().skip(offset as usize).cloned().collect()
    }

    /// Number of entries appended so far.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log is still empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Subscribe to entries appended after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

/// Partial payload emitted by a streaming worker mid-step.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Plan the step belongs to
    pub plan_id: Uuid,
    /// Step the chunk belongs to
    pub step_id: Uuid,
    /// Payload chunk, in worker-defined order
    pub chunk: String,
}

/// Broadcast bus for worker progress events.
///
/// Uses `tokio::broadcast` so multiple subscribers can watch the same plan.
/// Slow subscribers miss chunks (lagged) rather than blocking the worker.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future progress events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it;
    /// with no subscribers the event is silently dropped.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// A sink bound to one step, handed to its worker.
    #[must_use]
    pub fn sink(&self, plan_id: Uuid, step_id: Uuid) -> ProgressSink {
        ProgressSink {
            plan_id,
            step_id,
            bus: self.clone(),
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Cheap-to-clone handle a worker uses to emit partial payloads for one step.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    plan_id: Uuid,
    step_id: Uuid,
    bus: ProgressBus,
}

impl ProgressSink {
    /// Emit one payload chunk.
    pub fn emit(&self, chunk: impl Into<String>) {
        self.bus.publish(ProgressEvent {
            plan_id: self.plan_id,
            step_id: self.step_id,
            chunk: chunk.into(),
        });
    }
}
