use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// The embedding provider's identity: name + model + dimension (spec §4.6,
/// §9 "Global state"). Persisted alongside the store; compared on open to
/// detect a provider swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub name: String,
    pub model: String,
    pub dimension: usize,
}

impl ProviderIdentity {
    #[must_use]
    pub fn cache_key_prefix(&self) -> String {
        format!("{}:{}:{}", self.name, self.model, self.dimension)
    }
}

/// The store's reindex state machine (spec §4.6, §7 `DimensionMismatch`):
/// a provider swap with a different dimension moves every document through
/// `Reindexing` until its `reembed` task has drained.
#[derive(Debug, Clone, PartialEq)]
pub enum ReindexState {
    Current,
    Reindexing {
        since: DateTime<Utc>,
        total: usize,
        remaining: usize,
    },
}

impl ReindexState {
    #[must_use]
    pub fn is_reindexing(&self) -> bool {
        matches!(self, ReindexState::Reindexing { .. })
    }

    /// Record that one more `reembed` task has drained. Transitions back to
    /// `Current` once `remaining` reaches zero.
    #[must_use]
    pub fn advance(self) -> Self {
        match self {
            ReindexState::Reindexing {
                since,
                total,
                remaining,
            } if remaining > 1 => ReindexState::Reindexing {
                since,
                total,
                remaining: remaining - 1,
            },
            ReindexState::Reindexing { .. } => ReindexState::Current,
            ReindexState::Current => ReindexState::Current,
        }
    }
}

/// Compare the identity a store was indexed with against a newly loaded
/// provider's identity. A dimension change requires a full reindex; a
/// name/model change alone (same dimension) does not invalidate vectors
/// structurally but is still reported so callers can choose to reembed for
/// quality reasons.
#[must_use]
pub fn identity_changed(previous: &ProviderIdentity, current: &ProviderIdentity) -> bool {
    previous != current
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn advance_counts_down_to_current() {
        let state = ReindexState::Reindexing {
            since: Utc::now(),
            total: 2,
            remaining: 2,
        };
        let state = state.advance();
        assert!(state.is_reindexing());
        let state = state.advance();
        assert_eq!(state, ReindexState::Current);
    }

    #[test]
    fn identity_changed_detects_dimension_swap() {
        let a = ProviderIdentity {
            name: "local".into(),
            model: "mini".into(),
            dimension: 384,
        };
        let b = ProviderIdentity {
            dimension: 1536,
            ..a.clone()
        };
        assert!(identity_changed(&a, &b));
        assert!(!identity_changed(&a, &a.clone()));
    }
}
