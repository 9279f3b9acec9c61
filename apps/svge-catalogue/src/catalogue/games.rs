use std::collections::{HashMap, HashSet};

use svge_core::{
    compact, insert_or_move, ActorContext, Assignment, GameId, GameName, GameUrl, GroupKey,
    Placement, Requirement, ShortName, Slot,
};

use super::{
    access::{authorize, is_global_admin},
    core::AppState,
    db::now_unix,
    errors::CatalogueFailure,
    locks::OrderScope,
    metrics::record_reorder,
    store::{AuditEntry, ChangeSet, GameRecord, ScopeGuard},
    types::{GamePage, GameUpdate, GameView, GamesOverview, MemberView, NewGame},
};

fn game_slots(games: &[GameRecord]) -> Vec<Slot<GameId>> {
    games.iter().map(GameRecord::slot).collect()
}

/// Stages every other game whose position moved and returns the new
/// position of `target`.
pub(crate) fn stage_game_positions(
    games: &[GameRecord],
    assignments: &[Assignment<GameId>],
    target: Option<GameId>,
    changes: &mut ChangeSet,
) -> Option<u32> {
    let mut target_position = None;
    for assignment in assignments {
        if Some(assignment.id) == target {
            target_position = Some(assignment.position);
            continue;
        }
        if !assignment.is_changed() {
            continue;
        }
        if let Some(game) = games.iter().find(|game| game.id == assignment.id) {
            let mut moved = game.clone();
            moved.position = assignment.position;
            changes.upsert_games.push(moved);
        }
    }
    target_position
}

fn ensure_unique_game(
    games: &[GameRecord],
    except: Option<GameId>,
    name: &GameName,
    short_name: &ShortName,
    url: &GameUrl,
) -> Result<(), CatalogueFailure> {
    let clash = games.iter().filter(|game| Some(game.id) != except).any(|game| {
        &game.name == name || &game.short_name == short_name || &game.url == url
    });
    if clash {
        return Err(CatalogueFailure::conflict("game already exists"));
    }
    Ok(())
}

pub async fn add_game(
    state: &AppState,
    actor: &ActorContext,
    request: NewGame,
) -> Result<GameView, CatalogueFailure> {
    let grant = authorize(state, actor, &Requirement::GlobalAdmin).await?;
    let name = GameName::try_from(request.name)?;
    let short_name = ShortName::try_from(request.short_name)?;
    let url = GameUrl::from_short_name(&short_name);
    let reps_group = GroupKey::reps_for(&url);

    let _locks = state
        .locks
        .acquire(&[OrderScope::Games, OrderScope::Group(reps_group.clone())])
        .await;
    let games = state.store.list_games().await?;
    ensure_unique_game(&games, None, &name, &short_name, &url)?;
    let orphans = state.store.list_group(&reps_group).await?;
    if !orphans.is_empty() {
        return Err(CatalogueFailure::conflict(format!(
            "group {reps_group} already has members"
        )));
    }

    let id = GameId::new();
    let assignments = insert_or_move(
        &game_slots(&games),
        Placement::Insert(id),
        request.position.unwrap_or(i64::MAX),
    )
    .map_err(CatalogueFailure::invariant)?;

    let mut changes = ChangeSet::guarded(vec![
        ScopeGuard::games(&games),
        ScopeGuard::group(reps_group, &orphans),
    ]);
    let position = stage_game_positions(&games, &assignments, Some(id), &mut changes)
        .ok_or(CatalogueFailure::Internal)?;
    let record = GameRecord {
        id,
        name,
        short_name,
        url,
        brief: request.brief,
        tagline: request.tagline,
        heading: request.heading,
        text: request.text,
        position,
        created_at_unix: now_unix(),
    };
    let shifted = changes.upsert_games.len();
    changes.upsert_games.push(record.clone());
    changes.audit = Some(AuditEntry {
        action: "game.add",
        actor_external_id: actor.external_id().clone(),
        target_id: id.to_string(),
        grant: grant.clone(),
        details: serde_json::json!({
            "url": record.url.as_str(),
            "position": position,
            "shifted": shifted,
        }),
    });
    state.store.commit(changes).await?;
    record_reorder(OrderScope::Games.metric_label(), "insert");

    tracing::info!(
        event = "game.add",
        outcome = "committed",
        game_id = %id,
        url = %record.url,
        position,
        grant = grant.as_str(),
    );
    Ok(GameView::from(record))
}

#[allow(clippy::too_many_lines)]
pub async fn update_game(
    state: &AppState,
    actor: &ActorContext,
    game_id: GameId,
    update: GameUpdate,
) -> Result<GameView, CatalogueFailure> {
    let current = state
        .store
        .find_game(game_id)
        .await?
        .ok_or(CatalogueFailure::NotFound)?;
    let old_group = current.reps_group();
    let grant = authorize(state, actor, &Requirement::ScopedAdmin(old_group.clone())).await?;

    let name = update.name.map(GameName::try_from).transpose()?;
    let short_name = update.short_name.map(ShortName::try_from).transpose()?;
    let new_url = short_name.as_ref().map(GameUrl::from_short_name);

    let mut scopes = vec![OrderScope::Games, OrderScope::Group(old_group.clone())];
    if let Some(url) = new_url.as_ref().filter(|url| **url != current.url) {
        scopes.push(OrderScope::Group(GroupKey::reps_for(url)));
    }
    let _locks = state.locks.acquire(&scopes).await;

    let games = state.store.list_games().await?;
    let Some(locked) = games.iter().find(|game| game.id == game_id) else {
        return Err(CatalogueFailure::NotFound);
    };
    if locked.url != current.url {
        return Err(CatalogueFailure::conflict("game was renamed concurrently"));
    }

    let mut record = locked.clone();
    let mut changed: Vec<&'static str> = Vec::new();
    if let Some(name) = name.filter(|name| *name != record.name) {
        record.name = name;
        changed.push("name");
    }
    if let (Some(short_name), Some(url)) = (short_name, new_url) {
        if short_name != record.short_name {
            record.short_name = short_name;
            record.url = url;
            changed.push("short_name");
        }
    }
    if changed.contains(&"name") || changed.contains(&"short_name") {
        ensure_unique_game(
            &games,
            Some(game_id),
            &record.name,
            &record.short_name,
            &record.url,
        )?;
    }
    for (field, value, label) in [
        (&mut record.brief, update.brief, "brief"),
        (&mut record.tagline, update.tagline, "tagline"),
        (&mut record.heading, update.heading, "heading"),
        (&mut record.text, update.text, "text"),
    ] {
        if let Some(value) = value.filter(|value| value.as_str() != field.as_str()) {
            *field = value;
            changed.push(label);
        }
    }

    let mut changes = ChangeSet::guarded(vec![ScopeGuard::games(&games)]);
    let mut moved = false;
    if let Some(desired) = update.position {
        let assignments = insert_or_move(&game_slots(&games), Placement::Move(game_id), desired)
            .map_err(CatalogueFailure::invariant)?;
        let position = stage_game_positions(&games, &assignments, Some(game_id), &mut changes)
            .ok_or(CatalogueFailure::Internal)?;
        if position != record.position {
            record.position = position;
            moved = true;
            changed.push("position");
        }
    }

    if changed.is_empty() {
        tracing::debug!(event = "game.update", outcome = "unchanged", game_id = %game_id);
        return Ok(GameView::from(record));
    }

    let mut cascaded = 0;
    let new_group = record.reps_group();
    if new_group != old_group {
        let reps = state.store.list_group(&old_group).await?;
        let occupants = state.store.list_group(&new_group).await?;
        if !occupants.is_empty() {
            return Err(CatalogueFailure::conflict(format!(
                "group {new_group} already has members"
            )));
        }
        changes.guards.push(ScopeGuard::group(old_group.clone(), &reps));
        changes.guards.push(ScopeGuard::group(new_group.clone(), &occupants));
        cascaded = reps.len();
        for mut rep in reps {
            rep.group = new_group.clone();
            changes.upsert_members.push(rep);
        }
    }

    changes.upsert_games.push(record.clone());
    changes.audit = Some(AuditEntry {
        action: "game.update",
        actor_external_id: actor.external_id().clone(),
        target_id: game_id.to_string(),
        grant: grant.clone(),
        details: serde_json::json!({
            "fields": changed,
            "url": record.url.as_str(),
            "position": record.position,
            "cascaded_members": cascaded,
        }),
    });
    state.store.commit(changes).await?;
    if moved {
        record_reorder(OrderScope::Games.metric_label(), "move");
    }
    if cascaded > 0 {
        record_reorder("group", "cascade");
    }

    tracing::info!(
        event = "game.update",
        outcome = "committed",
        game_id = %game_id,
        fields = ?changed,
        old_group = %old_group,
        new_group = %new_group,
        cascaded_members = cascaded,
        grant = grant.as_str(),
    );
    Ok(GameView::from(record))
}

/// Deletes a game with all of its representatives and closes the gap it
/// leaves. Returns the remaining games in display order.
pub async fn delete_game(
    state: &AppState,
    actor: &ActorContext,
    game_id: GameId,
) -> Result<Vec<GameView>, CatalogueFailure> {
    let grant = authorize(state, actor, &Requirement::GlobalAdmin).await?;
    let current = state
        .store
        .find_game(game_id)
        .await?
        .ok_or(CatalogueFailure::NotFound)?;
    let reps_group = current.reps_group();

    let _locks = state
        .locks
        .acquire(&[OrderScope::Games, OrderScope::Group(reps_group.clone())])
        .await;
    let games = state.store.list_games().await?;
    let Some(locked) = games.iter().find(|game| game.id == game_id) else {
        return Err(CatalogueFailure::NotFound);
    };
    if locked.url != current.url {
        return Err(CatalogueFailure::conflict("game was renamed concurrently"));
    }
    let reps = state.store.list_group(&reps_group).await?;

    let survivors: Vec<GameRecord> = games
        .iter()
        .filter(|game| game.id != game_id)
        .cloned()
        .collect();
    let assignments = compact(&game_slots(&survivors)).map_err(CatalogueFailure::invariant)?;

    let mut changes = ChangeSet::guarded(vec![
        ScopeGuard::games(&games),
        ScopeGuard::group(reps_group.clone(), &reps),
    ]);
    stage_game_positions(&survivors, &assignments, None, &mut changes);
    changes.delete_games.push(game_id);
    changes
        .delete_members
        .extend(reps.iter().map(|rep| rep.id));
    changes.audit = Some(AuditEntry {
        action: "game.delete",
        actor_external_id: actor.external_id().clone(),
        target_id: game_id.to_string(),
        grant: grant.clone(),
        details: serde_json::json!({
            "url": locked.url.as_str(),
            "reps_removed": reps.len(),
        }),
    });
    state.store.commit(changes).await?;
    record_reorder(OrderScope::Games.metric_label(), "compact");

    tracing::info!(
        event = "game.delete",
        outcome = "committed",
        game_id = %game_id,
        url = %locked.url,
        reps_removed = reps.len(),
        grant = grant.as_str(),
    );

    let positions: HashMap<GameId, u32> = assignments
        .iter()
        .map(|assignment| (assignment.id, assignment.position))
        .collect();
    let mut remaining: Vec<GameView> = survivors
        .into_iter()
        .map(|mut game| {
            if let Some(position) = positions.get(&game.id) {
                game.position = *position;
            }
            GameView::from(game)
        })
        .collect();
    remaining.sort_by_key(|game| game.position);
    Ok(remaining)
}

/// The ordered catalogue plus what `actor` may edit in it.
pub async fn games_overview(
    state: &AppState,
    actor: Option<&ActorContext>,
) -> Result<GamesOverview, CatalogueFailure> {
    let games = state.store.list_games().await?;
    let (can_edit_all, can_edit_some) = match actor {
        None => (false, Vec::new()),
        Some(actor) => {
            let memberships = state.store.memberships_of(actor.external_id()).await?;
            if is_global_admin(state, actor, &memberships).await {
                (true, Vec::new())
            } else {
                let groups: HashSet<&GroupKey> =
                    memberships.iter().map(|membership| &membership.group).collect();
                let editable = games
                    .iter()
                    .filter(|game| groups.contains(&game.reps_group()))
                    .map(|game| game.id)
                    .collect();
                (false, editable)
            }
        }
    };
    Ok(GamesOverview {
        games: games.into_iter().map(GameView::from).collect(),
        can_edit_all,
        can_edit_some,
    })
}

/// One game page with its ordered representatives.
pub async fn game_page(
    state: &AppState,
    url: &str,
    actor: Option<&ActorContext>,
) -> Result<GamePage, CatalogueFailure> {
    let url = GameUrl::try_from(url.to_owned()).map_err(|_| CatalogueFailure::NotFound)?;
    let game = state
        .store
        .find_game_by_url(&url)
        .await?
        .ok_or(CatalogueFailure::NotFound)?;
    let reps = state.store.list_group(&game.reps_group()).await?;

    let (can_edit_all, can_edit_self) = match actor {
        None => (false, None),
        Some(actor) => {
            let memberships = state.store.memberships_of(actor.external_id()).await?;
            if is_global_admin(state, actor, &memberships).await {
                (true, None)
            } else {
                let own = reps
                    .iter()
                    .find(|rep| &rep.external_id == actor.external_id())
                    .map(|rep| rep.id);
                (false, own)
            }
        }
    };
    Ok(GamePage {
        game: GameView::from(game),
        reps: reps.into_iter().map(MemberView::from).collect(),
        can_edit_all,
        can_edit_self,
    })
}
