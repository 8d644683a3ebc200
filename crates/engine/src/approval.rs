//! Rendezvous between a waiting approval step and the human who decides it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::EngineError;

/// The verdict on an approval step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub decided_by: Uuid,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn approve(decided_by: Uuid, comment: Option<String>) -> Self {
        Self { approved: true, decided_by, comment, decided_at: Utc::now() }
    }

    pub fn reject(decided_by: Uuid, comment: Option<String>) -> Self {
        Self { approved: false, decided_by, comment, decided_at: Utc::now() }
    }
}

type GateKey = (Uuid, Uuid);

/// Open approval gates keyed by `(execution_id, step_id)`.
#[derive(Debug, Default)]
pub struct ApprovalGates {
    open: Mutex<HashMap<GateKey, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalGates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a gate and return the end the waiting step listens on.
    /// Re-opening an existing gate replaces it.
    pub async fn open(&self, execution_id: Uuid, step_id: Uuid) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        self.open.lock().await.insert((execution_id, step_id), tx);
        debug!(%execution_id, %step_id, "approval gate opened");
        rx
    }

    /// Deliver `decision` to the step waiting at the gate.
    ///
    /// # Errors
    /// [`EngineError::ApprovalNotPending`] if no step is waiting there.
    pub async fn decide(
        &self,
        execution_id: Uuid,
        step_id: Uuid,
        decision: ApprovalDecision,
    ) -> Result<(), EngineError> {
        let not_pending = || EngineError::ApprovalNotPending { execution_id, step_id };
        let tx = self
            .open
            .lock()
            .await
            .remove(&(execution_id, step_id))
            .ok_or_else(not_pending)?;
        tx.send(decision).map_err(|_| not_pending())
    }

    pub async fn is_open(&self, execution_id: Uuid, step_id: Uuid) -> bool {
        self.open.lock().await.contains_key(&(execution_id, step_id))
    }

    /// Drop every gate of an execution; waiting receivers see a closed channel.
    pub async fn close_all(&self, execution_id: Uuid) {
        self.open.lock().await.retain(|(exec, _), _| *exec != execution_id);
    }
}
