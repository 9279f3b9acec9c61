use svge_core::{ActorContext, ActorMembership, Grant, Requirement, Verdict};

use super::{core::AppState, errors::CatalogueFailure};

/// Resolves `requirement`, asking the role directory for the admin role only
/// when memberships and claimed roles were not enough.
pub(crate) async fn evaluate(
    state: &AppState,
    actor: &ActorContext,
    memberships: &[ActorMembership],
    requirement: &Requirement,
) -> Verdict {
    let verdict = state.resolver.resolve(actor, memberships, requirement);
    if verdict.is_allowed() {
        return verdict;
    }
    let Some(role) = state.resolver.admin_role() else {
        return verdict;
    };
    if actor.holds_role(role) {
        return verdict;
    }

    match state.roles.holds_role(actor.external_id(), role).await {
        Ok(true) => {
            let actor = actor.clone().with_role(role);
            state.resolver.resolve(&actor, memberships, requirement)
        }
        Ok(false) => verdict,
        Err(error) => {
            tracing::warn!(
                event = "authz.role_lookup",
                outcome = "failed",
                external_id = %actor.external_id(),
                error = %error,
            );
            verdict
        }
    }
}

pub(crate) async fn authorize(
    state: &AppState,
    actor: &ActorContext,
    requirement: &Requirement,
) -> Result<Grant, CatalogueFailure> {
    let memberships = state.store.memberships_of(actor.external_id()).await?;
    match evaluate(state, actor, &memberships, requirement)
        .await
        .into_result()
    {
        Ok(grant) => Ok(grant),
        Err(denial) => {
            tracing::warn!(
                event = "authz.check",
                outcome = "denied",
                external_id = %actor.external_id(),
                required = %denial.required,
                reason = denial.reason.as_str(),
            );
            Err(CatalogueFailure::forbidden(denial))
        }
    }
}

/// Whether `actor` may act as a global admin, without recording a denial.
pub(crate) async fn is_global_admin(
    state: &AppState,
    actor: &ActorContext,
    memberships: &[ActorMembership],
) -> bool {
    evaluate(state, actor, memberships, &Requirement::GlobalAdmin)
        .await
        .is_allowed()
}
