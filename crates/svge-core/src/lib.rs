#![forbid(unsafe_code)]

use serde::{Serialize, Serializer};
use ulid::Ulid;

mod authz;
mod ordering;

pub use authz::{
    ActorContext, ActorMembership, AuthorizationResolver, Denial, DenialReason, Grant,
    Requirement, Tier, Verdict,
};
pub use ordering::{compact, insert_or_move, verify_dense, Assignment, OrderingError, Placement, Slot};

pub const COMMITTEE_GROUP: &str = "committee";
const REPS_GROUP_SUFFIX: &str = "_reps";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("name is invalid")]
    InvalidName,
    #[error("short name is invalid")]
    InvalidShortName,
    #[error("game url is invalid")]
    InvalidGameUrl,
    #[error("group key is invalid")]
    InvalidGroupKey,
    #[error("external id is invalid")]
    InvalidExternalId,
    #[error("game id is invalid")]
    InvalidGameId,
    #[error("membership id is invalid")]
    InvalidMembershipId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameId(Ulid);

impl GameId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for GameId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Ulid::from_string(&value).map_err(|_| DomainError::InvalidGameId)?;
        Ok(Self(parsed))
    }
}

impl core::fmt::Display for GameId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for GameId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MembershipId(Ulid);

impl MembershipId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MembershipId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for MembershipId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = Ulid::from_string(&value).map_err(|_| DomainError::InvalidMembershipId)?;
        Ok(Self(parsed))
    }
}

impl core::fmt::Display for MembershipId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MembershipId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Identity issued by the upstream identity provider (a Discord snowflake).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExternalId(String);

impl ExternalId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ExternalId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_external_id(&value)?;
        Ok(Self(value))
    }
}

impl core::fmt::Display for ExternalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GameName(String);

impl GameName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GameName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        Ok(Self(value))
    }
}

/// Display name of a listed committee member or representative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MemberName(String);

impl MemberName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MemberName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 64)?;
        if value.trim().is_empty() {
            return Err(DomainError::InvalidName);
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ShortName(String);

impl ShortName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ShortName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_name(&value, 1, 32).map_err(|_| DomainError::InvalidShortName)?;
        if value.trim().is_empty() || value.chars().any(is_url_reserved) {
            return Err(DomainError::InvalidShortName);
        }
        Ok(Self(value))
    }
}

/// Path segment of a game page, derived from its short name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GameUrl(String);

impl GameUrl {
    /// Lowercases the short name and replaces every space with a hyphen.
    #[must_use]
    pub fn from_short_name(short_name: &ShortName) -> Self {
        Self(short_name.as_str().to_lowercase().replace(' ', "-"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GameUrl {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.to_lowercase();
        if !(1..=32).contains(&value.len())
            || !value.chars().all(|c| c.is_ascii_graphic())
            || value.chars().any(is_url_reserved)
        {
            return Err(DomainError::InvalidGameUrl);
        }
        Ok(Self(value))
    }
}

impl core::fmt::Display for GameUrl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a bucket of memberships that share one position sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupKey(String);

impl GroupKey {
    #[must_use]
    pub fn committee() -> Self {
        Self(COMMITTEE_GROUP.to_owned())
    }

    /// The only place a reps group key is derived from a game url.
    #[must_use]
    pub fn reps_for(url: &GameUrl) -> Self {
        Self(format!("{}{REPS_GROUP_SUFFIX}", url.as_str()))
    }

    #[must_use]
    pub fn is_committee(&self) -> bool {
        self.0 == COMMITTEE_GROUP
    }

    #[must_use]
    pub fn reps_game_url(&self) -> Option<GameUrl> {
        let url = self.0.strip_suffix(REPS_GROUP_SUFFIX)?;
        GameUrl::try_from(url.to_owned()).ok()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !(1..=64).contains(&value.len()) || !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(DomainError::InvalidGroupKey);
        }
        Ok(Self(value))
    }
}

impl core::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_url_reserved(c: char) -> bool {
    matches!(c, '/' | '?' | '#' | '%' | '\\')
}

fn validate_name(value: &str, min: usize, max: usize) -> Result<(), DomainError> {
    if !(min..=max).contains(&value.len()) {
        return Err(DomainError::InvalidName);
    }

    if value.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Ok(());
    }

    Err(DomainError::InvalidName)
}

fn validate_external_id(value: &str) -> Result<(), DomainError> {
    if !(1..=20).contains(&value.len()) {
        return Err(DomainError::InvalidExternalId);
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    Err(DomainError::InvalidExternalId)
}
