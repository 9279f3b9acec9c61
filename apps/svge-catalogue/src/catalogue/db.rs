use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use svge_core::{
    ActorMembership, ExternalId, GameId, GameName, GameUrl, GroupKey, MemberName, MembershipId,
    ShortName,
};
use ulid::Ulid;

use super::{
    errors::CatalogueFailure,
    locks::OrderScope,
    store::{snapshot, CatalogueStore, ChangeSet, GameRecord, MemberRecord},
};

const UNIQUE_VIOLATION: &str = "23505";

const CREATE_GAMES_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS games (
                    game_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    name_short TEXT NOT NULL UNIQUE,
                    url TEXT NOT NULL UNIQUE,
                    brief TEXT NOT NULL DEFAULT '',
                    tagline TEXT NOT NULL DEFAULT '',
                    heading TEXT NOT NULL DEFAULT '',
                    body_text TEXT NOT NULL DEFAULT '',
                    position INTEGER NOT NULL CHECK (position > 0),
                    created_at_unix BIGINT NOT NULL,
                    CONSTRAINT games_position_unique UNIQUE (position)
                        DEFERRABLE INITIALLY DEFERRED
                )";
const CREATE_MEMBERSHIPS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS memberships (
                    membership_id TEXT PRIMARY KEY,
                    group_key TEXT NOT NULL,
                    external_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    title TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    message TEXT NULL,
                    visible BOOLEAN NOT NULL DEFAULT TRUE,
                    position INTEGER NOT NULL CHECK (position > 0),
                    created_at_unix BIGINT NOT NULL,
                    CONSTRAINT memberships_group_identity_unique UNIQUE (group_key, external_id),
                    CONSTRAINT memberships_group_position_unique UNIQUE (group_key, position)
                        DEFERRABLE INITIALLY DEFERRED
                )";
const CREATE_MEMBERSHIPS_EXTERNAL_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_memberships_external_id
                    ON memberships(external_id)";
const CREATE_AUDIT_LOGS_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS audit_logs (
                    audit_id TEXT PRIMARY KEY,
                    action TEXT NOT NULL,
                    actor_external_id TEXT NOT NULL,
                    target_id TEXT NOT NULL,
                    grant_source TEXT NOT NULL,
                    tier TEXT NOT NULL,
                    details_json TEXT NOT NULL,
                    created_at_unix BIGINT NOT NULL
                )";
const CREATE_AUDIT_LOGS_CREATED_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_created
                    ON audit_logs(created_at_unix DESC)";

const GAME_COLUMNS: &str = "game_id, name, name_short, url, brief, tagline, heading, body_text, position, created_at_unix";
const MEMBER_COLUMNS: &str = "membership_id, group_key, external_id, name, title, description, message, visible, position, created_at_unix";

pub(crate) async fn ensure_db_schema(store: &CatalogueStore) -> Result<(), CatalogueFailure> {
    const SCHEMA_INIT_LOCK_ID: i64 = 0x5356_4745_4341_5441;
    let Some(pool) = &store.db_pool else {
        return Ok(());
    };

    store
        .db_init
        .get_or_try_init(|| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(SCHEMA_INIT_LOCK_ID)
                .execute(&mut *tx)
                .await?;

            for statement in [
                CREATE_GAMES_TABLE_SQL,
                CREATE_MEMBERSHIPS_TABLE_SQL,
                CREATE_MEMBERSHIPS_EXTERNAL_INDEX_SQL,
                CREATE_AUDIT_LOGS_TABLE_SQL,
                CREATE_AUDIT_LOGS_CREATED_INDEX_SQL,
            ] {
                sqlx::query(statement).execute(&mut *tx).await?;
            }

            tx.commit().await?;

            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|e| {
            tracing::error!(event = "db.init", error = %e);
            CatalogueFailure::Internal
        })?;

    Ok(())
}

pub(crate) fn now_unix() -> i64 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}

pub(crate) fn position_to_i32(position: u32) -> Result<i32, CatalogueFailure> {
    i32::try_from(position).map_err(|_| CatalogueFailure::Internal)
}

pub(crate) fn position_from_i32(value: i32) -> Result<u32, CatalogueFailure> {
    u32::try_from(value)
        .ok()
        .filter(|position| *position > 0)
        .ok_or(CatalogueFailure::Internal)
}

fn map_query_error(error: sqlx::Error) -> CatalogueFailure {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.code().as_deref() == Some(UNIQUE_VIOLATION) {
            tracing::warn!(
                event = "db.commit",
                outcome = "unique_violation",
                constraint = db_error.constraint().unwrap_or("unknown"),
            );
            return CatalogueFailure::conflict("a unique constraint rejected the change");
        }
    }
    tracing::error!(event = "db.query", error = %error);
    CatalogueFailure::Internal
}

fn decode<T, E>(value: Result<T, E>, column: &'static str) -> Result<T, CatalogueFailure>
where
    E: std::fmt::Display,
{
    value.map_err(|e| {
        tracing::error!(event = "db.decode", column, error = %e);
        CatalogueFailure::Internal
    })
}

fn game_from_row(row: &PgRow) -> Result<GameRecord, CatalogueFailure> {
    let id: String = decode(row.try_get("game_id"), "game_id")?;
    let name: String = decode(row.try_get("name"), "name")?;
    let short_name: String = decode(row.try_get("name_short"), "name_short")?;
    let url: String = decode(row.try_get("url"), "url")?;
    let position: i32 = decode(row.try_get("position"), "position")?;
    Ok(GameRecord {
        id: decode(GameId::try_from(id), "game_id")?,
        name: decode(GameName::try_from(name), "name")?,
        short_name: decode(ShortName::try_from(short_name), "name_short")?,
        url: decode(GameUrl::try_from(url), "url")?,
        brief: decode(row.try_get("brief"), "brief")?,
        tagline: decode(row.try_get("tagline"), "tagline")?,
        heading: decode(row.try_get("heading"), "heading")?,
        text: decode(row.try_get("body_text"), "body_text")?,
        position: position_from_i32(position)?,
        created_at_unix: decode(row.try_get("created_at_unix"), "created_at_unix")?,
    })
}

fn member_from_row(row: &PgRow) -> Result<MemberRecord, CatalogueFailure> {
    let id: String = decode(row.try_get("membership_id"), "membership_id")?;
    let group: String = decode(row.try_get("group_key"), "group_key")?;
    let external_id: String = decode(row.try_get("external_id"), "external_id")?;
    let name: String = decode(row.try_get("name"), "name")?;
    let position: i32 = decode(row.try_get("position"), "position")?;
    Ok(MemberRecord {
        id: decode(MembershipId::try_from(id), "membership_id")?,
        group: decode(GroupKey::try_from(group), "group_key")?,
        external_id: decode(ExternalId::try_from(external_id), "external_id")?,
        name: decode(MemberName::try_from(name), "name")?,
        title: decode(row.try_get("title"), "title")?,
        description: decode(row.try_get("description"), "description")?,
        message: decode(row.try_get("message"), "message")?,
        show: decode(row.try_get("visible"), "visible")?,
        position: position_from_i32(position)?,
        created_at_unix: decode(row.try_get("created_at_unix"), "created_at_unix")?,
    })
}

pub(crate) async fn list_games_db(pool: &PgPool) -> Result<Vec<GameRecord>, CatalogueFailure> {
    let rows = sqlx::query(&format!(
        "SELECT {GAME_COLUMNS} FROM games ORDER BY position ASC"
    ))
    .fetch_all(pool)
    .await
    .map_err(map_query_error)?;
    rows.iter().map(game_from_row).collect()
}

/// `column` is one of the fixed lookup columns, never caller input.
pub(crate) async fn find_game_db(
    pool: &PgPool,
    column: &'static str,
    value: &str,
) -> Result<Option<GameRecord>, CatalogueFailure> {
    let row = sqlx::query(&format!(
        "SELECT {GAME_COLUMNS} FROM games WHERE {column} = $1"
    ))
    .bind(value)
    .fetch_optional(pool)
    .await
    .map_err(map_query_error)?;
    row.as_ref().map(game_from_row).transpose()
}

pub(crate) async fn list_group_db(
    pool: &PgPool,
    group: &GroupKey,
) -> Result<Vec<MemberRecord>, CatalogueFailure> {
    let rows = sqlx::query(&format!(
        "SELECT {MEMBER_COLUMNS} FROM memberships WHERE group_key = $1 ORDER BY position ASC"
    ))
    .bind(group.as_str())
    .fetch_all(pool)
    .await
    .map_err(map_query_error)?;
    rows.iter().map(member_from_row).collect()
}

pub(crate) async fn memberships_of_db(
    pool: &PgPool,
    external_id: &ExternalId,
) -> Result<Vec<ActorMembership>, CatalogueFailure> {
    let rows = sqlx::query(
        "SELECT membership_id, group_key FROM memberships WHERE external_id = $1",
    )
    .bind(external_id.as_str())
    .fetch_all(pool)
    .await
    .map_err(map_query_error)?;
    rows.iter()
        .map(|row| {
            let id: String = decode(row.try_get("membership_id"), "membership_id")?;
            let group: String = decode(row.try_get("group_key"), "group_key")?;
            Ok(ActorMembership {
                id: decode(MembershipId::try_from(id), "membership_id")?,
                group: decode(GroupKey::try_from(group), "group_key")?,
            })
        })
        .collect()
}

pub(crate) async fn group_keys_db(pool: &PgPool) -> Result<Vec<GroupKey>, CatalogueFailure> {
    let rows = sqlx::query("SELECT DISTINCT group_key FROM memberships ORDER BY group_key ASC")
        .fetch_all(pool)
        .await
        .map_err(map_query_error)?;
    rows.iter()
        .map(|row| {
            let group: String = decode(row.try_get("group_key"), "group_key")?;
            decode(GroupKey::try_from(group), "group_key")
        })
        .collect()
}

pub(crate) async fn recent_audit_db(
    pool: &PgPool,
    limit: usize,
) -> Result<Vec<serde_json::Value>, CatalogueFailure> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = sqlx::query(
        "SELECT audit_id, action, actor_external_id, target_id, grant_source, tier, details_json, created_at_unix
         FROM audit_logs
         ORDER BY created_at_unix DESC, audit_id DESC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_query_error)?;
    rows.iter()
        .map(|row| {
            let details: String = decode(row.try_get("details_json"), "details_json")?;
            Ok(serde_json::json!({
                "audit_id": decode(row.try_get::<String, _>("audit_id"), "audit_id")?,
                "action": decode(row.try_get::<String, _>("action"), "action")?,
                "actor_external_id": decode(row.try_get::<String, _>("actor_external_id"), "actor_external_id")?,
                "target_id": decode(row.try_get::<String, _>("target_id"), "target_id")?,
                "grant_source": decode(row.try_get::<String, _>("grant_source"), "grant_source")?,
                "tier": decode(row.try_get::<String, _>("tier"), "tier")?,
                "details": decode(serde_json::from_str::<serde_json::Value>(&details), "details_json")?,
                "created_at_unix": decode(row.try_get::<i64, _>("created_at_unix"), "created_at_unix")?,
            }))
        })
        .collect()
}

async fn scope_snapshot_db(
    tx: &mut Transaction<'_, Postgres>,
    scope: &OrderScope,
) -> Result<Vec<(u32, String)>, CatalogueFailure> {
    let rows = match scope {
        OrderScope::Games => {
            sqlx::query("SELECT game_id AS row_id, position FROM games")
                .fetch_all(&mut **tx)
                .await
        }
        OrderScope::Group(group) => {
            sqlx::query(
                "SELECT membership_id AS row_id, position FROM memberships WHERE group_key = $1",
            )
            .bind(group.as_str())
            .fetch_all(&mut **tx)
            .await
        }
    }
    .map_err(map_query_error)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: String = decode(row.try_get("row_id"), "row_id")?;
        let position: i32 = decode(row.try_get("position"), "position")?;
        entries.push((position_from_i32(position)?, id));
    }
    Ok(snapshot(entries.into_iter()))
}

#[allow(clippy::too_many_lines)]
pub(crate) async fn commit_db(pool: &PgPool, changes: ChangeSet) -> Result<(), CatalogueFailure> {
    let mut tx = pool.begin().await.map_err(map_query_error)?;

    let mut lock_keys: Vec<String> = changes
        .guards
        .iter()
        .map(|guard| guard.scope.lock_key())
        .collect();
    lock_keys.sort();
    lock_keys.dedup();
    for key in lock_keys {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(map_query_error)?;
    }

    for guard in &changes.guards {
        if scope_snapshot_db(&mut tx, &guard.scope).await? != guard.snapshot {
            return Err(CatalogueFailure::conflict(format!(
                "{} changed concurrently",
                guard.scope
            )));
        }
    }

    if !changes.delete_members.is_empty() {
        let ids: Vec<String> = changes
            .delete_members
            .iter()
            .map(ToString::to_string)
            .collect();
        sqlx::query("DELETE FROM memberships WHERE membership_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(map_query_error)?;
    }
    if !changes.delete_games.is_empty() {
        let ids: Vec<String> = changes
            .delete_games
            .iter()
            .map(ToString::to_string)
            .collect();
        sqlx::query("DELETE FROM games WHERE game_id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(map_query_error)?;
    }

    for game in &changes.upsert_games {
        sqlx::query(
            "INSERT INTO games (game_id, name, name_short, url, brief, tagline, heading, body_text, position, created_at_unix)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (game_id) DO UPDATE SET
                name = EXCLUDED.name,
                name_short = EXCLUDED.name_short,
                url = EXCLUDED.url,
                brief = EXCLUDED.brief,
                tagline = EXCLUDED.tagline,
                heading = EXCLUDED.heading,
                body_text = EXCLUDED.body_text,
                position = EXCLUDED.position",
        )
        .bind(game.id.to_string())
        .bind(game.name.as_str())
        .bind(game.short_name.as_str())
        .bind(game.url.as_str())
        .bind(&game.brief)
        .bind(&game.tagline)
        .bind(&game.heading)
        .bind(&game.text)
        .bind(position_to_i32(game.position)?)
        .bind(game.created_at_unix)
        .execute(&mut *tx)
        .await
        .map_err(map_query_error)?;
    }

    for member in &changes.upsert_members {
        sqlx::query(
            "INSERT INTO memberships (membership_id, group_key, external_id, name, title, description, message, visible, position, created_at_unix)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (membership_id) DO UPDATE SET
                group_key = EXCLUDED.group_key,
                name = EXCLUDED.name,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                message = EXCLUDED.message,
                visible = EXCLUDED.visible,
                position = EXCLUDED.position",
        )
        .bind(member.id.to_string())
        .bind(member.group.as_str())
        .bind(member.external_id.as_str())
        .bind(member.name.as_str())
        .bind(&member.title)
        .bind(&member.description)
        .bind(member.message.as_deref())
        .bind(member.show)
        .bind(position_to_i32(member.position)?)
        .bind(member.created_at_unix)
        .execute(&mut *tx)
        .await
        .map_err(map_query_error)?;
    }

    if let Some(audit) = &changes.audit {
        sqlx::query(
            "INSERT INTO audit_logs (audit_id, action, actor_external_id, target_id, grant_source, tier, details_json, created_at_unix)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Ulid::new().to_string())
        .bind(audit.action)
        .bind(audit.actor_external_id.as_str())
        .bind(&audit.target_id)
        .bind(audit.grant.as_str())
        .bind(audit.grant.tier().as_str())
        .bind(audit.details.to_string())
        .bind(now_unix())
        .execute(&mut *tx)
        .await
        .map_err(map_query_error)?;
    }

    tx.commit().await.map_err(map_query_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{now_unix, position_from_i32, position_to_i32};

    #[test]
    fn positions_round_trip_through_integer_columns() {
        assert_eq!(position_from_i32(position_to_i32(7).unwrap()).unwrap(), 7);
        assert!(position_from_i32(0).is_err());
        assert!(position_from_i32(-3).is_err());
        assert!(position_to_i32(u32::MAX).is_err());
    }

    #[test]
    fn clock_is_after_the_epoch() {
        assert!(now_unix() > 0);
    }
}
