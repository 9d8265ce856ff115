//! The single-session workflow: capture input, generate, show results.
//!
//! ```text
//! Idle ──start──▶ CapturingInput ──begin──▶ Generating ──ok──▶ ShowingResults
//!                   ▲        ▲                   │                 │
//!                   │        └──── failure ──────┘                 │
//!                   └────────────── start / regenerate ────────────┘
//! ```
//!
//! Exactly one [`WorkflowState`] exists per [`Workflow`]. Every transition
//! happens inside a single `&mut self` call, so no caller can observe a
//! half-applied one.

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::{ArtifactFetcher, DownloadReport, Downloader, SaveTarget};
use crate::generation::{
    AggregationPolicy, ArtifactRef, Batch, Cancelled, ErrorCause, GenerationClient, Orchestrator,
};
use crate::selection::Selection;
use crate::submission::Submission;

/// Names of the workflow phases, for logs and errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Nothing started yet.
    Idle,
    /// Waiting for a photo.
    CapturingInput,
    /// Requests are in flight.
    Generating,
    /// Results are up for selection.
    ShowingResults,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CapturingInput => "capturing-input",
            Self::Generating => "generating",
            Self::ShowingResults => "showing-results",
        };
        f.write_str(name)
    }
}

/// Identifies one in-flight generation and carries its cancellation token.
#[derive(Clone, Debug)]
pub struct GenerationTicket {
    id: u64,
    cancel: CancellationToken,
}

impl GenerationTicket {
    /// Monotonic id, unique within one workflow.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token to hand to [`Orchestrator::generate`].
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Abandons the generation this ticket belongs to.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl PartialEq for GenerationTicket {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for GenerationTicket {}

/// Where the session is, with the data that phase owns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkflowState {
    /// Nothing started yet.
    Idle,
    /// Waiting for a photo. `last_error` is only set after a failed attempt.
    CapturingInput {
        /// Cause of the last failed generation
        last_error: Option<ErrorCause>,
    },
    /// A generation is in flight.
    Generating {
        /// The in-flight generation
        ticket: GenerationTicket,
    },
    /// A batch came back and the user is picking.
    ShowingResults {
        /// The batch and the current picks
        selection: Selection,
    },
}

impl WorkflowState {
    /// Name of this state.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::CapturingInput { .. } => Phase::CapturingInput,
            Self::Generating { .. } => Phase::Generating,
            Self::ShowingResults { .. } => Phase::ShowingResults,
        }
    }
}

/// Requests the current state doesn't allow.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    /// The action isn't valid in this phase.
    #[error("Cannot {action} while {phase}")]
    IllegalTransition {
        /// What was attempted
        action: &'static str,
        /// Phase at the time
        phase: Phase,
    },
    /// A completion arrived for a generation that was replaced or cancelled.
    #[error("Generation {ticket} is no longer current")]
    StaleTicket {
        /// Id of the stale ticket
        ticket: u64,
    },
}

/// Owns the session state and the orchestrator that drives it.
pub struct Workflow<C> {
    state: WorkflowState,
    orchestrator: Orchestrator<C>,
    policy: AggregationPolicy,
    next_ticket: u64,
    last_batch: Option<Batch>,
}

impl<C: GenerationClient> Workflow<C> {
    /// A fresh session in `Idle`, all-or-nothing aggregation.
    pub fn new(orchestrator: Orchestrator<C>) -> Self {
        Self {
            state: WorkflowState::Idle,
            orchestrator,
            policy: AggregationPolicy::default(),
            next_ticket: 0,
            last_batch: None,
        }
    }

    /// Sets how partially failed batches are judged.
    pub fn with_policy(mut self, policy: AggregationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current state.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Aggregation policy in use.
    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// The orchestrator generations go through.
    pub fn orchestrator(&self) -> &Orchestrator<C> {
        &self.orchestrator
    }

    /// Error of the last failed attempt, while waiting for new input.
    pub fn last_error(&self) -> Option<&ErrorCause> {
        match &self.state {
            WorkflowState::CapturingInput { last_error } => last_error.as_ref(),
            _ => None,
        }
    }

    /// Every branch of the most recent completed generation, including the
    /// ones the aggregation policy hid.
    pub fn last_batch(&self) -> Option<&Batch> {
        self.last_batch.as_ref()
    }

    /// Current selection, while showing results.
    pub fn selection(&self) -> Option<&Selection> {
        match &self.state {
            WorkflowState::ShowingResults { selection } => Some(selection),
            _ => None,
        }
    }

    fn transition(&mut self, next: WorkflowState) {
        info!("Workflow {} -> {}", self.state.phase(), next.phase());
        self.state = next;
    }

    /// Enters `CapturingInput` from anywhere, dropping results and errors.
    ///
    /// An outstanding generation is cancelled; its completion will be
    /// rejected as stale.
    pub fn start(&mut self) {
        if let WorkflowState::Generating { ticket } = &self.state {
            warn!("Abandoning generation {}", ticket.id);
            ticket.cancel();
        }
        self.last_batch = None;
        self.transition(WorkflowState::CapturingInput { last_error: None });
    }

    /// "Generate more" from the results view.
    pub fn regenerate(&mut self) -> Result<(), WorkflowError> {
        self.require(Phase::ShowingResults, "regenerate")?;
        self.start();
        Ok(())
    }

    fn require(&self, phase: Phase, action: &'static str) -> Result<(), WorkflowError> {
        if self.phase() == phase {
            Ok(())
        } else {
            Err(WorkflowError::IllegalTransition {
                action,
                phase: self.phase(),
            })
        }
    }

    /// First half of a submit: `CapturingInput -> Generating`.
    pub fn begin(&mut self) -> Result<GenerationTicket, WorkflowError> {
        self.require(Phase::CapturingInput, "submit")?;
        self.next_ticket += 1;
        let ticket = GenerationTicket {
            id: self.next_ticket,
            cancel: CancellationToken::new(),
        };
        self.transition(WorkflowState::Generating {
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Second half of a submit. Rejects tickets that are no longer current
    /// and leaves the state untouched in that case.
    pub fn complete(
        &mut self,
        ticket: &GenerationTicket,
        result: Result<Batch, Cancelled>,
    ) -> Result<&WorkflowState, WorkflowError> {
        match &self.state {
            WorkflowState::Generating { ticket: current } if current == ticket => {}
            _ => {
                debug!("Dropping result of stale generation {}", ticket.id);
                return Err(WorkflowError::StaleTicket { ticket: ticket.id });
            }
        }

        let next = match result {
            Ok(batch) => {
                let resolved = batch.resolve(self.policy);
                self.last_batch = Some(batch);
                match resolved {
                    Ok(artifacts) => {
                        if artifacts.is_empty() {
                            warn!("Generation succeeded but returned no usable images");
                        }
                        WorkflowState::ShowingResults {
                            selection: Selection::new(artifacts),
                        }
                    }
                    Err(cause) => {
                        warn!("Generation failed: {cause}");
                        WorkflowState::CapturingInput {
                            last_error: Some(cause),
                        }
                    }
                }
            }
            Err(Cancelled) => WorkflowState::CapturingInput { last_error: None },
        };
        self.transition(next);
        Ok(&self.state)
    }

    /// Runs a whole generation for `submission` and lands in either
    /// `ShowingResults` or `CapturingInput` with `last_error` set.
    pub async fn submit(&mut self, submission: Submission) -> Result<&WorkflowState, WorkflowError> {
        let ticket = self.begin()?;
        let result = self
            .orchestrator
            .generate(&submission, ticket.cancel_token())
            .await;
        drop(submission);
        self.complete(&ticket, result)
    }

    /// Flips one artifact in the current selection.
    pub fn toggle(&mut self, artifact: &ArtifactRef) -> Result<Option<bool>, WorkflowError> {
        match &mut self.state {
            WorkflowState::ShowingResults { selection } => Ok(selection.toggle(artifact)),
            other => Err(WorkflowError::IllegalTransition {
                action: "toggle",
                phase: other.phase(),
            }),
        }
    }

    /// Downloads the current selection. Never changes the workflow state.
    pub async fn download_selected<F, T>(
        &self,
        downloader: &Downloader<F, T>,
    ) -> Result<DownloadReport, WorkflowError>
    where
        F: ArtifactFetcher,
        T: SaveTarget,
    {
        let selection = self.selection().ok_or(WorkflowError::IllegalTransition {
            action: "download",
            phase: self.phase(),
        })?;
        Ok(downloader.download_all(&selection.selected()).await)
    }
}
