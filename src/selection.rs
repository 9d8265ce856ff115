//! Which generated artifacts the user wants to keep.

use std::collections::HashSet;

use crate::generation::ArtifactRef;

/// Results of one batch plus the user's picks. Starts with everything selected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    artifacts: Vec<ArtifactRef>,
    selected: HashSet<ArtifactRef>,
}

impl Selection {
    /// Every artifact starts selected.
    pub fn new(artifacts: Vec<ArtifactRef>) -> Self {
        let selected = artifacts.iter().cloned().collect();
        Self {
            artifacts,
            selected,
        }
    }

    /// All artifacts of the batch, in the order they were generated.
    pub fn artifacts(&self) -> &[ArtifactRef] {
        &self.artifacts
    }

    /// Flips membership of `artifact`. Returns the new membership, or `None`
    /// when `artifact` isn't part of this batch.
    pub fn toggle(&mut self, artifact: &ArtifactRef) -> Option<bool> {
        if !self.artifacts.contains(artifact) {
            return None;
        }
        if self.selected.remove(artifact) {
            Some(false)
        } else {
            self.selected.insert(artifact.clone());
            Some(true)
        }
    }

    /// Toggles the artifact at a zero-based position.
    pub fn toggle_index(&mut self, index: usize) -> Option<bool> {
        let artifact = self.artifacts.get(index)?.clone();
        self.toggle(&artifact)
    }

    /// Whether `artifact` will be downloaded.
    pub fn is_selected(&self, artifact: &ArtifactRef) -> bool {
        self.selected.contains(artifact)
    }

    /// Selected artifacts in generation order, each listed once.
    pub fn selected(&self) -> Vec<ArtifactRef> {
        let mut seen = HashSet::new();
        self.artifacts
            .iter()
            .filter(|artifact| self.selected.contains(*artifact) && seen.insert(*artifact))
            .cloned()
            .collect()
    }

    /// Number of artifacts in the batch, selected or not.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// True when the batch produced nothing.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}
