//! Revision chains.
//!
//! Every migration step names itself with an opaque revision token and names
//! the step that must run before it with a down-revision token. A set of such
//! steps is only usable when the tokens form a single linear chain starting at
//! exactly one base step. [`RevisionChain::build`] checks that and orders the
//! steps; the path helpers then answer "which steps run, in which order" for
//! upgrades and downgrades.

use std::collections::{HashMap, HashSet};

/// Something that takes part in a revision chain.
pub trait Revisioned {
    /// The opaque token identifying this step.
    fn revision(&self) -> &str;

    /// The token of the step that must be applied before this one, or `None`
    /// for the base of the chain.
    fn down_revision(&self) -> Option<&str>;
}

impl<T: Revisioned + ?Sized> Revisioned for &T {
    fn revision(&self) -> &str {
        (**self).revision()
    }

    fn down_revision(&self) -> Option<&str> {
        (**self).down_revision()
    }
}

/// Errors raised while building or walking a revision chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevisionGraphError {
    /// Two steps declare the same revision.
    #[error("Revision {0} is declared more than once")]
    DuplicateRevision(String),

    /// A step points at a down-revision no step declares.
    #[error("Revision {revision} depends on unknown revision {down_revision}")]
    MissingDownRevision {
        /// The step holding the dangling reference.
        revision: String,
        /// The revision it refers to.
        down_revision: String,
    },

    /// No step is free of a down-revision.
    #[error("No base revision found")]
    NoBase,

    /// More than one step is free of a down-revision.
    #[error("Multiple base revisions found: {0:?}")]
    MultipleBases(Vec<String>),

    /// Two or more steps share the same down-revision.
    #[error("Revision {down_revision} is followed by more than one revision: {revisions:?}")]
    Branched {
        /// The shared parent.
        down_revision: String,
        /// The competing children.
        revisions: Vec<String>,
    },

    /// Steps that cannot be reached by walking forward from the base.
    #[error("Revisions unreachable from the base: {0:?}")]
    Unreachable(Vec<String>),

    /// A revision that is not part of the chain.
    #[error("Unknown revision {0}")]
    UnknownRevision(String),

    /// Upgrading to a revision that is older than the current one.
    #[error("Cannot upgrade to {target}: current revision {current} is newer")]
    TargetBehindCurrent {
        /// Current revision.
        current: String,
        /// Requested target.
        target: String,
    },

    /// Downgrading to a revision that is newer than the current one.
    #[error("Cannot downgrade to {target}: current revision is {current}")]
    TargetAheadOfCurrent {
        /// Current revision, or `base`.
        current: String,
        /// Requested target.
        target: String,
    },
}

/// An ordered, validated list of steps from base to head.
#[derive(Debug, Clone)]
pub struct RevisionChain<T> {
    steps: Vec<T>,
}

impl<T: Revisioned> RevisionChain<T> {
    /// Orders `nodes` into a chain, failing if they do not form exactly one.
    pub fn build(nodes: impl IntoIterator<Item = T>) -> Result<Self, RevisionGraphError> {
        let nodes: Vec<T> = nodes.into_iter().collect();
        if nodes.is_empty() {
            return Ok(Self { steps: nodes });
        }

        let order = Self::order(&nodes)?;

        let mut slots: Vec<Option<T>> = nodes.into_iter().map(Some).collect();
        let steps: Vec<T> = order
            .into_iter()
            .filter_map(|index| slots.get_mut(index).and_then(Option::take))
            .collect();

        log::debug!("Built revision chain of {} steps", steps.len());
        Ok(Self { steps })
    }

    fn order(nodes: &[T]) -> Result<Vec<usize>, RevisionGraphError> {
        let mut by_revision: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            if by_revision.insert(node.revision(), index).is_some() {
                return Err(RevisionGraphError::DuplicateRevision(
                    node.revision().to_string(),
                ));
            }
        }

        let mut bases = Vec::new();
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            match node.down_revision() {
                None => bases.push(index),
                Some(parent) => {
                    if !by_revision.contains_key(parent) {
                        return Err(RevisionGraphError::MissingDownRevision {
                            revision: node.revision().to_string(),
                            down_revision: parent.to_string(),
                        });
                    }
                    children.entry(parent).or_default().push(index);
                }
            }
        }

        let base = match bases.as_slice() {
            [] => return Err(RevisionGraphError::NoBase),
            [single] => *single,
            many => {
                return Err(RevisionGraphError::MultipleBases(
                    many.iter()
                        .map(|i| nodes[*i].revision().to_string())
                        .collect(),
                ));
            }
        };

        if let Some((parent, kids)) = children.iter().find(|(_, kids)| kids.len() > 1) {
            let mut revisions: Vec<String> = kids
                .iter()
                .map(|i| nodes[*i].revision().to_string())
                .collect();
            revisions.sort();
            return Err(RevisionGraphError::Branched {
                down_revision: parent.to_string(),
                revisions,
            });
        }

        let mut order = Vec::with_capacity(nodes.len());
        let mut visited = HashSet::with_capacity(nodes.len());
        let mut cursor = Some(base);
        while let Some(index) = cursor {
            if !visited.insert(index) {
                break;
            }
            order.push(index);
            cursor = children
                .get(nodes[index].revision())
                .and_then(|kids| kids.first().copied());
        }

        if order.len() != nodes.len() {
            let mut unreachable: Vec<String> = (0..nodes.len())
                .filter(|i| !visited.contains(i))
                .map(|i| nodes[i].revision().to_string())
                .collect();
            unreachable.sort();
            return Err(RevisionGraphError::Unreachable(unreachable));
        }

        Ok(order)
    }

    /// Steps from base to head.
    pub fn steps(&self) -> &[T] {
        &self.steps
    }

    /// Number of steps in the chain.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the chain holds no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The first step.
    pub fn base(&self) -> Option<&T> {
        self.steps.first()
    }

    /// The last step.
    pub fn head(&self) -> Option<&T> {
        self.steps.last()
    }

    /// Position of `revision` in the chain, counted from the base.
    pub fn position(&self, revision: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.revision() == revision)
    }

    fn require(&self, revision: &str) -> Result<usize, RevisionGraphError> {
        self.position(revision)
            .ok_or_else(|| RevisionGraphError::UnknownRevision(revision.to_string()))
    }

    /// Steps to apply, oldest first, to move from `current` to `target`.
    ///
    /// `current = None` means nothing is applied yet. Upgrading to the current
    /// revision yields an empty path.
    pub fn upgrade_path(
        &self,
        current: Option<&str>,
        target: &str,
    ) -> Result<&[T], RevisionGraphError> {
        let start = match current {
            Some(rev) => self.require(rev)? + 1,
            None => 0,
        };
        let end = self.require(target)? + 1;
        if end < start {
            return Err(RevisionGraphError::TargetBehindCurrent {
                current: current.unwrap_or_default().to_string(),
                target: target.to_string(),
            });
        }
        Ok(&self.steps[start..end])
    }

    /// Steps to revert, newest first, to move from `current` back to `target`.
    ///
    /// `target = None` reverts everything down to (and including) the base.
    pub fn downgrade_path(
        &self,
        current: Option<&str>,
        target: Option<&str>,
    ) -> Result<Vec<&T>, RevisionGraphError> {
        let end = match current {
            Some(rev) => self.require(rev)? + 1,
            None => 0,
        };
        let start = match target {
            Some(rev) => self.require(rev)? + 1,
            None => 0,
        };
        if start > end {
            return Err(RevisionGraphError::TargetAheadOfCurrent {
                current: current.unwrap_or("base").to_string(),
                target: target.unwrap_or("base").to_string(),
            });
        }
        Ok(self.steps[start..end].iter().rev().collect())
    }
}
