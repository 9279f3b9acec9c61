use svge_core::{Denial, DomainError, OrderingError};

use super::metrics::{record_authorization_denial, record_invariant_violation};

#[derive(Debug, thiserror::Error)]
pub enum CatalogueFailure {
    #[error("not found")]
    NotFound,
    /// Carries the requirement that was not met, never the actor's own tier.
    #[error("forbidden: {0}")]
    Forbidden(Denial),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("ordering invariant violated: {0}")]
    InvariantViolation(OrderingError),
    #[error("invalid request: {0}")]
    InvalidRequest(DomainError),
    #[error("internal error")]
    Internal,
}

impl CatalogueFailure {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal => "internal",
        }
    }

    pub(crate) fn forbidden(denial: Denial) -> Self {
        record_authorization_denial(denial.reason.as_str());
        Self::Forbidden(denial)
    }

    pub(crate) fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    pub(crate) fn invariant(error: OrderingError) -> Self {
        record_invariant_violation(error.as_str());
        tracing::error!(
            event = "ordering.invariant",
            outcome = "violated",
            kind = error.as_str(),
            error = %error,
        );
        Self::InvariantViolation(error)
    }
}

impl From<DomainError> for CatalogueFailure {
    fn from(error: DomainError) -> Self {
        Self::InvalidRequest(error)
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
