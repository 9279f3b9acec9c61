use serde::Serialize;
use svge_core::verify_dense;

use super::{
    core::AppState, db::ensure_db_schema, errors::CatalogueFailure, locks::OrderScope,
    metrics::record_invariant_violation, store::GameRecord, store::MemberRecord,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeViolation {
    pub scope: String,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderingReport {
    pub scopes_checked: usize,
    pub violations: Vec<ScopeViolation>,
}

impl OrderingReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn check(&mut self, scope: &OrderScope, outcome: Result<(), svge_core::OrderingError>) {
        self.scopes_checked += 1;
        if let Err(error) = outcome {
            record_invariant_violation(error.as_str());
            tracing::error!(
                event = "ordering.verify",
                outcome = "violated",
                scope = %scope,
                kind = error.as_str(),
                error = %error,
            );
            self.violations.push(ScopeViolation {
                scope: scope.to_string(),
                kind: error.as_str(),
                error: error.to_string(),
            });
        }
    }
}

/// Creates the Postgres schema if needed. A no-op for the memory backend.
///
/// # Errors
/// Returns `Internal` if the schema cannot be created.
pub async fn prepare_storage(state: &AppState) -> Result<(), CatalogueFailure> {
    ensure_db_schema(&state.store).await?;
    tracing::info!(event = "storage.prepare", backend = state.store.backend());
    Ok(())
}

/// Checks position density of the games collection and of every membership
/// group. Reports violations without repairing anything.
///
/// # Errors
/// Returns `Internal` if the store cannot be read.
pub async fn verify_ordering(state: &AppState) -> Result<OrderingReport, CatalogueFailure> {
    let mut report = OrderingReport::default();

    let games = state.store.list_games().await?;
    let slots: Vec<_> = games.iter().map(GameRecord::slot).collect();
    report.check(&OrderScope::Games, verify_dense(&slots));

    for group in state.store.group_keys().await? {
        let members = state.store.list_group(&group).await?;
        let slots: Vec<_> = members.iter().map(MemberRecord::slot).collect();
        report.check(&OrderScope::Group(group), verify_dense(&slots));
    }

    tracing::info!(
        event = "ordering.verify",
        outcome = if report.is_clean() { "clean" } else { "violated" },
        scopes_checked = report.scopes_checked,
        violations = report.violations.len(),
    );
    Ok(report)
}

/// Newest audit entries first.
///
/// # Errors
/// Returns `Internal` if the store cannot be read.
pub async fn recent_audit_entries(
    state: &AppState,
    limit: usize,
) -> Result<Vec<serde_json::Value>, CatalogueFailure> {
    state.store.recent_audit(limit).await
}
