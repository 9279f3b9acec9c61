use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use anyhow::anyhow;
use sqlx::{postgres::PgPoolOptions, PgPool};
use svge_core::{
    ActorMembership, ExternalId, GameId, GameName, GameUrl, Grant, GroupKey, MemberName,
    MembershipId, ShortName, Slot,
};
use tokio::sync::{OnceCell, RwLock};
use ulid::Ulid;

use super::{core::AppConfig, db, errors::CatalogueFailure, locks::OrderScope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GameRecord {
    pub(crate) id: GameId,
    pub(crate) name: GameName,
    pub(crate) short_name: ShortName,
    pub(crate) url: GameUrl,
    pub(crate) brief: String,
    pub(crate) tagline: String,
    pub(crate) heading: String,
    pub(crate) text: String,
    pub(crate) position: u32,
    pub(crate) created_at_unix: i64,
}

impl GameRecord {
    pub(crate) fn slot(&self) -> Slot<GameId> {
        Slot {
            id: self.id,
            position: self.position,
        }
    }

    pub(crate) fn reps_group(&self) -> GroupKey {
        GroupKey::reps_for(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MemberRecord {
    pub(crate) id: MembershipId,
    pub(crate) group: GroupKey,
    pub(crate) external_id: ExternalId,
    pub(crate) name: MemberName,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) message: Option<String>,
    pub(crate) show: bool,
    pub(crate) position: u32,
    pub(crate) created_at_unix: i64,
}

impl MemberRecord {
    pub(crate) fn slot(&self) -> Slot<MembershipId> {
        Slot {
            id: self.id,
            position: self.position,
        }
    }
}

/// The ids and positions of one scope as the workflow read them. A commit
/// carrying a guard only applies if the scope still looks exactly like this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScopeGuard {
    pub(crate) scope: OrderScope,
    pub(crate) snapshot: Vec<(u32, String)>,
}

impl ScopeGuard {
    pub(crate) fn games(games: &[GameRecord]) -> Self {
        Self {
            scope: OrderScope::Games,
            snapshot: snapshot(games.iter().map(|game| (game.position, game.id.to_string()))),
        }
    }

    pub(crate) fn group(group: GroupKey, members: &[MemberRecord]) -> Self {
        Self {
            scope: OrderScope::Group(group),
            snapshot: snapshot(
                members
                    .iter()
                    .map(|member| (member.position, member.id.to_string())),
            ),
        }
    }
}

pub(crate) fn snapshot(rows: impl Iterator<Item = (u32, String)>) -> Vec<(u32, String)> {
    let mut rows: Vec<(u32, String)> = rows.collect();
    rows.sort();
    rows
}

#[derive(Debug, Clone)]
pub(crate) struct AuditEntry {
    pub(crate) action: &'static str,
    pub(crate) actor_external_id: ExternalId,
    pub(crate) target_id: String,
    pub(crate) grant: Grant,
    pub(crate) details: serde_json::Value,
}

/// Everything one mutation writes. Applied all-or-nothing by
/// [`CatalogueStore::commit`].
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub(crate) guards: Vec<ScopeGuard>,
    pub(crate) upsert_games: Vec<GameRecord>,
    pub(crate) delete_games: Vec<GameId>,
    pub(crate) upsert_members: Vec<MemberRecord>,
    pub(crate) delete_members: Vec<MembershipId>,
    pub(crate) audit: Option<AuditEntry>,
}

impl ChangeSet {
    pub(crate) fn guarded(guards: Vec<ScopeGuard>) -> Self {
        Self {
            guards,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Clone)]
struct MemoryTables {
    games: HashMap<GameId, GameRecord>,
    members: HashMap<MembershipId, MemberRecord>,
    audit_logs: Vec<serde_json::Value>,
}

impl MemoryTables {
    fn scope_snapshot(&self, scope: &OrderScope) -> Vec<(u32, String)> {
        match scope {
            OrderScope::Games => snapshot(
                self.games
                    .values()
                    .map(|game| (game.position, game.id.to_string())),
            ),
            OrderScope::Group(group) => snapshot(
                self.members
                    .values()
                    .filter(|member| &member.group == group)
                    .map(|member| (member.position, member.id.to_string())),
            ),
        }
    }

    /// Mirrors the unique constraints of the Postgres schema.
    fn check_constraints(&self) -> Result<(), CatalogueFailure> {
        let mut names = HashSet::new();
        let mut short_names = HashSet::new();
        let mut urls = HashSet::new();
        let mut game_positions = HashSet::new();
        for game in self.games.values() {
            if !names.insert(game.name.as_str())
                || !short_names.insert(game.short_name.as_str())
                || !urls.insert(game.url.as_str())
            {
                return Err(CatalogueFailure::conflict("game already exists"));
            }
            if !game_positions.insert(game.position) {
                return Err(CatalogueFailure::conflict("game position is already taken"));
            }
        }

        let mut identities = HashSet::new();
        let mut member_positions = HashSet::new();
        for member in self.members.values() {
            if !identities.insert((&member.group, &member.external_id)) {
                return Err(CatalogueFailure::conflict("member is already part of the group"));
            }
            if !member_positions.insert((&member.group, member.position)) {
                return Err(CatalogueFailure::conflict("member position is already taken"));
            }
        }
        Ok(())
    }
}

/// Catalogue persistence. Postgres when a database url is configured,
/// process memory otherwise.
#[derive(Clone)]
pub(crate) struct CatalogueStore {
    pub(crate) db_pool: Option<PgPool>,
    pub(crate) db_init: Arc<OnceCell<()>>,
    memory: Arc<RwLock<MemoryTables>>,
}

impl CatalogueStore {
    pub(crate) fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let db_pool = if let Some(database_url) = &config.database_url {
            Some(
                PgPoolOptions::new()
                    .max_connections(config.db_max_connections)
                    .connect_lazy(database_url)
                    .map_err(|e| anyhow!("postgres pool init failed: {e}"))?,
            )
        } else {
            None
        };
        Ok(Self {
            db_pool,
            db_init: Arc::new(OnceCell::new()),
            memory: Arc::new(RwLock::new(MemoryTables::default())),
        })
    }

    pub(crate) fn backend(&self) -> &'static str {
        if self.db_pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }

    pub(crate) async fn list_games(&self) -> Result<Vec<GameRecord>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::list_games_db(pool).await;
        }

        let tables = self.memory.read().await;
        let mut games: Vec<GameRecord> = tables.games.values().cloned().collect();
        games.sort_by_key(|game| game.position);
        Ok(games)
    }

    pub(crate) async fn find_game(&self, id: GameId) -> Result<Option<GameRecord>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::find_game_db(pool, "game_id", &id.to_string()).await;
        }

        Ok(self.memory.read().await.games.get(&id).cloned())
    }

    pub(crate) async fn find_game_by_url(
        &self,
        url: &GameUrl,
    ) -> Result<Option<GameRecord>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::find_game_db(pool, "url", url.as_str()).await;
        }

        Ok(self
            .memory
            .read()
            .await
            .games
            .values()
            .find(|game| &game.url == url)
            .cloned())
    }

    pub(crate) async fn list_group(
        &self,
        group: &GroupKey,
    ) -> Result<Vec<MemberRecord>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::list_group_db(pool, group).await;
        }

        let tables = self.memory.read().await;
        let mut members: Vec<MemberRecord> = tables
            .members
            .values()
            .filter(|member| &member.group == group)
            .cloned()
            .collect();
        members.sort_by_key(|member| member.position);
        Ok(members)
    }

    /// Every membership persisted for `external_id`, across all groups.
    pub(crate) async fn memberships_of(
        &self,
        external_id: &ExternalId,
    ) -> Result<Vec<ActorMembership>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::memberships_of_db(pool, external_id).await;
        }

        Ok(self
            .memory
            .read()
            .await
            .members
            .values()
            .filter(|member| &member.external_id == external_id)
            .map(|member| ActorMembership {
                id: member.id,
                group: member.group.clone(),
            })
            .collect())
    }

    pub(crate) async fn group_keys(&self) -> Result<Vec<GroupKey>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::group_keys_db(pool).await;
        }

        let tables = self.memory.read().await;
        let keys: BTreeSet<GroupKey> = tables
            .members
            .values()
            .map(|member| member.group.clone())
            .collect();
        Ok(keys.into_iter().collect())
    }

    pub(crate) async fn recent_audit(
        &self,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::recent_audit_db(pool, limit).await;
        }

        let tables = self.memory.read().await;
        Ok(tables
            .audit_logs
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    /// Applies `changes` atomically after verifying every guard.
    pub(crate) async fn commit(&self, changes: ChangeSet) -> Result<(), CatalogueFailure> {
        if let Some(pool) = &self.db_pool {
            db::ensure_db_schema(self).await?;
            return db::commit_db(pool, changes).await;
        }

        let mut tables = self.memory.write().await;
        for guard in &changes.guards {
            if tables.scope_snapshot(&guard.scope) != guard.snapshot {
                return Err(CatalogueFailure::conflict(format!(
                    "{} changed concurrently",
                    guard.scope
                )));
            }
        }

        let mut staged = tables.clone();
        for id in &changes.delete_members {
            staged.members.remove(id);
        }
        for id in &changes.delete_games {
            staged.games.remove(id);
        }
        for game in changes.upsert_games {
            staged.games.insert(game.id, game);
        }
        for member in changes.upsert_members {
            staged.members.insert(member.id, member);
        }
        staged.check_constraints()?;
        if let Some(audit) = changes.audit {
            staged.audit_logs.push(audit_json(&audit, db::now_unix()));
        }
        *tables = staged;
        Ok(())
    }
}

pub(crate) fn audit_json(audit: &AuditEntry, created_at_unix: i64) -> serde_json::Value {
    serde_json::json!({
        "audit_id": Ulid::new().to_string(),
        "action": audit.action,
        "actor_external_id": audit.actor_external_id.as_str(),
        "target_id": audit.target_id,
        "grant_source": audit.grant.as_str(),
        "tier": audit.grant.tier().as_str(),
        "details": audit.details,
        "created_at_unix": created_at_unix,
    })
}
