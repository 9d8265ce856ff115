//! Fans one submission out into several independent requests and joins them.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::classify;
use super::request::GenerationClient;
use super::{ArtifactRef, ErrorCause, GenerationOutcome};
use crate::constants::DEFAULT_FANOUT;
use crate::submission::Submission;

/// How a batch with some failed branches is presented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Any failure fails the whole batch; the first one to complete is surfaced.
    #[default]
    AllOrNothing,
    /// Keep whatever succeeded; fail only when every branch failed.
    PartialSuccess,
}

/// The generation was cancelled before every branch finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("generation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Every branch's outcome, by launch index, plus the order they finished in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    outcomes: Vec<GenerationOutcome>,
    completion_order: Vec<usize>,
}

impl Batch {
    /// Builds a batch from outcomes listed in completion order.
    pub fn from_completions(completions: Vec<(usize, GenerationOutcome)>) -> Self {
        let mut slots: Vec<Option<GenerationOutcome>> = vec![None; completions.len()];
        let mut completion_order = Vec::with_capacity(completions.len());
        for (index, outcome) in completions {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
                completion_order.push(index);
            }
        }
        let outcomes = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    GenerationOutcome::Failure(ErrorCause::Unknown("branch never completed".into()))
                })
            })
            .collect();
        Self {
            outcomes,
            completion_order,
        }
    }

    /// Outcomes in launch order.
    pub fn outcomes(&self) -> &[GenerationOutcome] {
        &self.outcomes
    }

    /// Launch indices in the order their branches completed.
    pub fn completion_order(&self) -> &[usize] {
        &self.completion_order
    }

    /// Number of branches.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True when nothing was launched.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Failure of the branch that completed first among the failed ones.
    pub fn first_failure(&self) -> Option<&ErrorCause> {
        self.completion_order
            .iter()
            .filter_map(|index| self.outcomes.get(*index))
            .find_map(GenerationOutcome::cause)
    }

    /// Non-empty references in launch order.
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.outcomes
            .iter()
            .filter_map(GenerationOutcome::artifact)
            .filter(|artifact| !artifact.is_empty())
            .cloned()
            .collect()
    }

    /// Collapses the batch into what the user sees.
    ///
    /// An empty list after filtering is a success, not an error.
    pub fn resolve(&self, policy: AggregationPolicy) -> Result<Vec<ArtifactRef>, ErrorCause> {
        let failures = self.outcomes.iter().filter(|o| !o.is_success()).count();
        match (policy, self.first_failure()) {
            (AggregationPolicy::AllOrNothing, Some(cause)) => Err(cause.clone()),
            (AggregationPolicy::PartialSuccess, Some(cause)) if failures == self.outcomes.len() => {
                Err(cause.clone())
            }
            _ => Ok(self.artifacts()),
        }
    }
}

/// Issues `fanout` concurrent requests per submission.
pub struct Orchestrator<C> {
    client: Arc<C>,
    fanout: NonZeroUsize,
}

impl<C> Clone for Orchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            fanout: self.fanout,
        }
    }
}

impl<C: GenerationClient> Orchestrator<C> {
    /// Fans out [`DEFAULT_FANOUT`] requests per submission.
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            fanout: DEFAULT_FANOUT,
        }
    }

    /// Overrides how many requests each submission gets.
    pub fn with_fanout(mut self, fanout: NonZeroUsize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Requests per submission.
    pub fn fanout(&self) -> NonZeroUsize {
        self.fanout
    }

    /// Client every branch shares.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Runs every branch to completion, or stops them all when `cancel` fires.
    ///
    /// A slow or failing branch never shortcuts the others.
    pub async fn generate(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<Batch, Cancelled> {
        let fanout = self.fanout.get();
        info!("Launching {fanout} generation requests");

        let mut pending: FuturesUnordered<_> = (0..fanout)
            .map(|index| {
                let client = Arc::clone(&self.client);
                async move {
                    let outcome = match client.request_one(submission).await {
                        Ok(artifact) => GenerationOutcome::Success(artifact),
                        Err(failure) => {
                            warn!("Generation request {} failed: {failure}", index + 1);
                            GenerationOutcome::Failure(classify(&failure))
                        }
                    };
                    (index, outcome)
                }
            })
            .collect();

        let mut completions = Vec::with_capacity(fanout);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        "Generation cancelled with {} of {fanout} requests outstanding",
                        fanout - completions.len()
                    );
                    return Err(Cancelled);
                }
                next = pending.next() => match next {
                    Some((index, outcome)) => {
                        debug!("Generation request {} finished: {:?}", index + 1, outcome);
                        completions.push((index, outcome));
                    }
                    None => break,
                },
            }
        }

        Ok(Batch::from_completions(completions))
    }
}
