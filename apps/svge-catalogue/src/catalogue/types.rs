use serde::{Deserialize, Deserializer, Serialize};
use svge_core::{
    ExternalId, GameId, GameName, GameUrl, GroupKey, MemberName, MembershipId, ShortName,
};

use super::store::{GameRecord, MemberRecord};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewGame {
    pub name: String,
    pub short_name: String,
    pub brief: String,
    pub tagline: String,
    pub heading: String,
    pub text: String,
    /// Appends at the end when absent.
    pub position: Option<i64>,
}

/// Partial game edit. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GameUpdate {
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub brief: Option<String>,
    pub tagline: Option<String>,
    pub heading: Option<String>,
    pub text: Option<String>,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMember {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_show")]
    pub show: bool,
    #[serde(default)]
    pub position: Option<i64>,
}

impl NewMember {
    #[must_use]
    pub fn new(external_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            title: String::new(),
            description: String::new(),
            message: None,
            show: default_show(),
            position: None,
        }
    }
}

const fn default_show() -> bool {
    true
}

/// Partial member edit. `message: Some(None)` clears the message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemberUpdate {
    pub name: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "present_or_null")]
    pub message: Option<Option<String>>,
    pub show: Option<bool>,
    pub position: Option<i64>,
}

/// Maps a present field to `Some`, so an explicit `null` becomes `Some(None)`.
/// An absent field falls back to the `#[serde(default)]` of `None`.
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Which membership group a member operation addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupTarget {
    Committee,
    /// Representatives of the game with this url.
    GameReps(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameView {
    pub id: GameId,
    pub name: GameName,
    pub short_name: ShortName,
    pub url: GameUrl,
    pub brief: String,
    pub tagline: String,
    pub heading: String,
    pub text: String,
    pub position: u32,
}

impl From<GameRecord> for GameView {
    fn from(record: GameRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            short_name: record.short_name,
            url: record.url,
            brief: record.brief,
            tagline: record.tagline,
            heading: record.heading,
            text: record.text,
            position: record.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberView {
    pub id: MembershipId,
    pub group: GroupKey,
    pub external_id: ExternalId,
    pub name: MemberName,
    pub title: String,
    pub description: String,
    pub message: Option<String>,
    pub show: bool,
    pub position: u32,
}

impl From<MemberRecord> for MemberView {
    fn from(record: MemberRecord) -> Self {
        Self {
            id: record.id,
            group: record.group,
            external_id: record.external_id,
            name: record.name,
            title: record.title,
            description: record.description,
            message: record.message,
            show: record.show,
            position: record.position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GamesOverview {
    pub games: Vec<GameView>,
    pub can_edit_all: bool,
    /// Games whose reps group the actor belongs to. Empty for global admins.
    pub can_edit_some: Vec<GameId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GamePage {
    pub game: GameView,
    pub reps: Vec<MemberView>,
    pub can_edit_all: bool,
    /// The actor's own rep entry. `None` for global admins.
    pub can_edit_self: Option<MembershipId>,
}

#[cfg(test)]
mod tests {
    use super::{GameUpdate, MemberUpdate, NewMember};

    #[test]
    fn partial_updates_default_to_untouched() {
        let update: GameUpdate = serde_json::from_str(r#"{"position":2}"#).unwrap();
        assert_eq!(update.position, Some(2));
        assert!(update.name.is_none() && update.short_name.is_none());

        let update: MemberUpdate = serde_json::from_str(r#"{"show":true}"#).unwrap();
        assert_eq!(update.message, None);
        let update: MemberUpdate = serde_json::from_str(r#"{"message":null}"#).unwrap();
        assert_eq!(update.message, Some(None));
        let update: MemberUpdate = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(update.message, Some(Some(String::from("hi"))));
        let update: MemberUpdate = serde_json::from_str(r#"{"show":false}"#).unwrap();
        assert_eq!(update.show, Some(false));
    }

    #[test]
    fn new_members_are_shown_by_default() {
        let member: NewMember =
            serde_json::from_str(r#"{"external_id":"42","name":"Ada"}"#).unwrap();
        assert!(member.show);
        assert_eq!(member.position, None);
        assert!(NewMember::new("42", "Ada").show);
    }
}
