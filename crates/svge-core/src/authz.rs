//! Tiered authorization over persisted memberships and external role claims.

use std::{collections::BTreeSet, fmt};

use serde::Serialize;

use crate::{ExternalId, GroupKey, MembershipId};

/// The acting identity, as authenticated upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    external_id: ExternalId,
    external_roles: BTreeSet<String>,
}

impl ActorContext {
    #[must_use]
    pub fn new(external_id: ExternalId) -> Self {
        Self {
            external_id,
            external_roles: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.external_roles.insert(role.into());
        self
    }

    #[must_use]
    pub fn external_id(&self) -> &ExternalId {
        &self.external_id
    }

    #[must_use]
    pub fn holds_role(&self, role: &str) -> bool {
        self.external_roles.contains(role)
    }
}

/// One persisted membership held by the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorMembership {
    pub id: MembershipId,
    pub group: GroupKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Requirement {
    GlobalAdmin,
    ScopedAdmin(GroupKey),
    SelfOrScopedAdmin {
        group: GroupKey,
        target: MembershipId,
    },
}

impl Requirement {
    #[must_use]
    pub fn tier(&self) -> Tier {
        match self {
            Self::GlobalAdmin => Tier::GlobalAdmin,
            Self::ScopedAdmin(_) => Tier::ScopedAdmin,
            Self::SelfOrScopedAdmin { .. } => Tier::SelfOwned,
        }
    }

    fn scope(&self) -> Option<&GroupKey> {
        match self {
            Self::GlobalAdmin => None,
            Self::ScopedAdmin(group) | Self::SelfOrScopedAdmin { group, .. } => Some(group),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalAdmin => f.write_str("global admin"),
            Self::ScopedAdmin(group) => write!(f, "scoped admin for {group}"),
            Self::SelfOrScopedAdmin { group, .. } => write!(f, "self or scoped admin for {group}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    GlobalAdmin,
    ScopedAdmin,
    SelfOwned,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GlobalAdmin => "global_admin",
            Self::ScopedAdmin => "scoped_admin",
            Self::SelfOwned => "self",
        }
    }
}

/// Why an action was allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    Committee,
    ExternalRole,
    GroupMember(GroupKey),
    SelfOwned(MembershipId),
}

impl Grant {
    #[must_use]
    pub fn tier(&self) -> Tier {
        match self {
            Self::Committee | Self::ExternalRole => Tier::GlobalAdmin,
            Self::GroupMember(_) => Tier::ScopedAdmin,
            Self::SelfOwned(_) => Tier::SelfOwned,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Committee => "committee",
            Self::ExternalRole => "external_role",
            Self::GroupMember(_) => "group_member",
            Self::SelfOwned(_) => "self",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// The actor holds no membership in any group.
    NoIdentityRecord,
    InsufficientTier,
}

impl DenialReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoIdentityRecord => "no_identity_record",
            Self::InsufficientTier => "insufficient_tier",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("requires {required}")]
pub struct Denial {
    pub required: Requirement,
    pub reason: DenialReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow(Grant),
    Deny(Denial),
}

impl Verdict {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// # Errors
    /// Returns the denial when the verdict is `Deny`.
    pub fn into_result(self) -> Result<Grant, Denial> {
        match self {
            Self::Allow(grant) => Ok(grant),
            Self::Deny(denial) => Err(denial),
        }
    }
}

/// Decides requirements from persisted memberships first, then the
/// configured external admin role.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationResolver {
    admin_role: Option<String>,
}

impl AuthorizationResolver {
    #[must_use]
    pub fn new(admin_role: Option<String>) -> Self {
        Self { admin_role }
    }

    #[must_use]
    pub fn admin_role(&self) -> Option<&str> {
        self.admin_role.as_deref()
    }

    /// `memberships` must be every membership persisted for `actor`.
    #[must_use]
    pub fn resolve(
        &self,
        actor: &ActorContext,
        memberships: &[ActorMembership],
        requirement: &Requirement,
    ) -> Verdict {
        if let Some(grant) = self.global_admin(actor, memberships) {
            return Verdict::Allow(grant);
        }
        if memberships.is_empty() {
            return deny(requirement, DenialReason::NoIdentityRecord);
        }

        if let Some(group) = requirement.scope() {
            if memberships.iter().any(|membership| &membership.group == group) {
                return Verdict::Allow(Grant::GroupMember(group.clone()));
            }
        }
        if let Requirement::SelfOrScopedAdmin { target, .. } = requirement {
            if memberships.iter().any(|membership| membership.id == *target) {
                return Verdict::Allow(Grant::SelfOwned(*target));
            }
        }
        deny(requirement, DenialReason::InsufficientTier)
    }

    fn global_admin(&self, actor: &ActorContext, memberships: &[ActorMembership]) -> Option<Grant> {
        if memberships
            .iter()
            .any(|membership| membership.group.is_committee())
        {
            return Some(Grant::Committee);
        }
        let role = self.admin_role.as_deref()?;
        actor.holds_role(role).then_some(Grant::ExternalRole)
    }
}

fn deny(requirement: &Requirement, reason: DenialReason) -> Verdict {
    Verdict::Deny(Denial {
        required: requirement.clone(),
        reason,
    })
}
