//! [`ReplicationRule`]: identity of a source-to-destination mapping.
//! Immutable once registered.

use serde::{Deserialize, Serialize};

/// Declaration of a source-to-destination replication relationship with
/// optional filters and schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationRule {
    pub source_registry: String,
    pub source_repository: String,
    pub dest_registry: String,
    pub dest_repository: String,
    /// Optional glob pattern; only tags matching this filter (and not
    /// excluded) are considered for replication.
    pub tag_filter: Option<String>,
    /// Six-field-plus-descriptors cron expression, or `@now`/`@once`.
    /// `None` means the rule is never fired by the scheduler (on-demand
    /// only, via [`crate::reconcile::reconcile_repository`] directly).
    pub schedule: Option<String>,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub force_overwrite: bool,
}

impl ReplicationRule {
    /// Identity: concatenation of the four registry/repo fields. A
    /// separator outside the legal character set for registry ids and
    /// repository patterns (which are slash/dot/dash/alnum delimited)
    /// keeps two distinct four-tuples from ever colliding.
    pub fn rule_key(&self) -> String {
        format!(
            "{}\u{1}{}\u{1}{}\u{1}{}",
            self.source_registry, self.source_repository, self.dest_registry, self.dest_repository
        )
    }

    /// Non-empty validation for the four identity fields; both job
    /// registration and reconciliation validate eagerly before doing any
    /// work.
    pub fn validate_identity(&self) -> Result<(), String> {
        if self.source_registry.is_empty() {
            return Err("source registry id must not be empty".into());
        }
        if self.source_repository.is_empty() {
            return Err("source repository pattern must not be empty".into());
        }
        if self.dest_registry.is_empty() {
            return Err("destination registry id must not be empty".into());
        }
        if self.dest_repository.is_empty() {
            return Err("destination repository pattern must not be empty".into());
        }
        Ok(())
    }

    /// True if `tag` passes the rule's filter: matches `tag_filter` (if
    /// set), matches at least one `include_tags` glob (if non-empty), and
    /// matches no `exclude_tags` glob.
    pub fn tag_matches(&self, tag: &str) -> bool {
        if let Some(filter) = &self.tag_filter {
            if !crate::reconcile::glob::matches(filter, tag) {
                return false;
            }
        }
        if !self.include_tags.is_empty()
            && !self.include_tags.iter().any(|p| crate::reconcile::glob::matches(p, tag))
        {
            return false;
        }
        if self.exclude_tags.iter().any(|p| crate::reconcile::glob::matches(p, tag)) {
            return false;
        }
        true
    }
}
