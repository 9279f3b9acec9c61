use std::collections::HashMap;

use svge_core::{
    compact, insert_or_move, ActorContext, Assignment, ExternalId, GameUrl, GroupKey, MemberName,
    MembershipId, Placement, Requirement, Slot,
};

use super::{
    access::authorize,
    core::AppState,
    db::now_unix,
    errors::CatalogueFailure,
    locks::OrderScope,
    metrics::record_reorder,
    store::{AuditEntry, ChangeSet, MemberRecord, ScopeGuard},
    types::{GroupTarget, MemberUpdate, MemberView, NewMember},
};

/// The group key a target addresses. A url that cannot name a game cannot
/// name a group either.
pub(crate) fn group_key(target: &GroupTarget) -> Result<GroupKey, CatalogueFailure> {
    match target {
        GroupTarget::Committee => Ok(GroupKey::committee()),
        GroupTarget::GameReps(url) => GameUrl::try_from(url.clone())
            .map(|url| GroupKey::reps_for(&url))
            .map_err(|_| CatalogueFailure::NotFound),
    }
}

fn member_slots(members: &[MemberRecord]) -> Vec<Slot<MembershipId>> {
    members.iter().map(MemberRecord::slot).collect()
}

fn stage_member_positions(
    members: &[MemberRecord],
    assignments: &[Assignment<MembershipId>],
    target: Option<MembershipId>,
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
        if let Some(member) = members.iter().find(|member| member.id == assignment.id) {
            let mut moved = member.clone();
            moved.position = assignment.position;
            changes.upsert_members.push(moved);
        }
    }
    target_position
}

pub async fn add_member(
    state: &AppState,
    actor: &ActorContext,
    target: &GroupTarget,
    request: NewMember,
) -> Result<MemberView, CatalogueFailure> {
    let group = group_key(target)?;
    let grant = authorize(state, actor, &Requirement::ScopedAdmin(group.clone())).await?;
    let external_id = ExternalId::try_from(request.external_id)?;
    let name = MemberName::try_from(request.name)?;

    let mut scopes = vec![OrderScope::Group(group.clone())];
    let parent_url = group.reps_game_url();
    if parent_url.is_some() {
        scopes.push(OrderScope::Games);
    }
    let _locks = state.locks.acquire(&scopes).await;

    let mut guards = Vec::new();
    if let Some(url) = &parent_url {
        if state.store.find_game_by_url(url).await?.is_none() {
            return Err(CatalogueFailure::NotFound);
        }
        guards.push(ScopeGuard::games(&state.store.list_games().await?));
    }
    let members = state.store.list_group(&group).await?;
    if members.iter().any(|member| member.external_id == external_id) {
        return Err(CatalogueFailure::conflict(format!(
            "{external_id} is already part of group {group}"
        )));
    }

    let id = MembershipId::new();
    let assignments = insert_or_move(
        &member_slots(&members),
        Placement::Insert(id),
        request.position.unwrap_or(i64::MAX),
    )
    .map_err(CatalogueFailure::invariant)?;

    guards.push(ScopeGuard::group(group.clone(), &members));
    let mut changes = ChangeSet::guarded(guards);
    let position = stage_member_positions(&members, &assignments, Some(id), &mut changes)
        .ok_or(CatalogueFailure::Internal)?;
    let record = MemberRecord {
        id,
        group: group.clone(),
        external_id,
        name,
        title: request.title,
        description: request.description,
        message: request.message,
        show: request.show,
        position,
        created_at_unix: now_unix(),
    };
    let shifted = changes.upsert_members.len();
    changes.upsert_members.push(record.clone());
    changes.audit = Some(AuditEntry {
        action: "member.add",
        actor_external_id: actor.external_id().clone(),
        target_id: id.to_string(),
        grant: grant.clone(),
        details: serde_json::json!({
            "group": group.as_str(),
            "external_id": record.external_id.as_str(),
            "position": position,
            "shifted": shifted,
        }),
    });
    state.store.commit(changes).await?;
    record_reorder(OrderScope::Group(group.clone()).metric_label(), "insert");

    tracing::info!(
        event = "member.add",
        outcome = "committed",
        membership_id = %id,
        group = %group,
        position,
        grant = grant.as_str(),
    );
    Ok(MemberView::from(record))
}

pub async fn update_member(
    state: &AppState,
    actor: &ActorContext,
    target: &GroupTarget,
    member_id: MembershipId,
    update: MemberUpdate,
) -> Result<MemberView, CatalogueFailure> {
    let group = group_key(target)?;
    let grant = authorize(
        state,
        actor,
        &Requirement::SelfOrScopedAdmin {
            group: group.clone(),
            target: member_id,
        },
    )
    .await?;
    let name = update.name.map(MemberName::try_from).transpose()?;

    let _locks = state
        .locks
        .acquire(&[OrderScope::Group(group.clone())])
        .await;
    let members = state.store.list_group(&group).await?;
    let Some(current) = members.iter().find(|member| member.id == member_id) else {
        return Err(CatalogueFailure::NotFound);
    };

    let mut record = current.clone();
    let mut changed: Vec<&'static str> = Vec::new();
    if let Some(name) = name.filter(|name| *name != record.name) {
        record.name = name;
        changed.push("name");
    }
    if let Some(title) = update.title.filter(|title| *title != record.title) {
        record.title = title;
        changed.push("title");
    }
    if let Some(description) = update
        .description
        .filter(|description| *description != record.description)
    {
        record.description = description;
        changed.push("description");
    }
    if let Some(message) = update.message.filter(|message| *message != record.message) {
        record.message = message;
        changed.push("message");
    }
    if let Some(show) = update.show.filter(|show| *show != record.show) {
        record.show = show;
        changed.push("show");
    }

    let mut changes = ChangeSet::guarded(vec![ScopeGuard::group(group.clone(), &members)]);
    let mut moved = false;
    if let Some(desired) = update.position {
        let assignments =
            insert_or_move(&member_slots(&members), Placement::Move(member_id), desired)
                .map_err(CatalogueFailure::invariant)?;
        let position =
            stage_member_positions(&members, &assignments, Some(member_id), &mut changes)
                .ok_or(CatalogueFailure::Internal)?;
        if position != record.position {
            record.position = position;
            moved = true;
            changed.push("position");
        }
    }

    if changed.is_empty() {
        tracing::debug!(event = "member.update", outcome = "unchanged", membership_id = %member_id);
        return Ok(MemberView::from(record));
    }

    changes.upsert_members.push(record.clone());
    changes.audit = Some(AuditEntry {
        action: "member.update",
        actor_external_id: actor.external_id().clone(),
        target_id: member_id.to_string(),
        grant: grant.clone(),
        details: serde_json::json!({
            "group": group.as_str(),
            "fields": changed,
            "position": record.position,
        }),
    });
    state.store.commit(changes).await?;
    if moved {
        record_reorder(OrderScope::Group(group.clone()).metric_label(), "move");
    }

    tracing::info!(
        event = "member.update",
        outcome = "committed",
        membership_id = %member_id,
        group = %group,
        fields = ?changed,
        grant = grant.as_str(),
    );
    Ok(MemberView::from(record))
}

/// Removes a member and closes the gap. Returns the group in display order.
pub async fn delete_member(
    state: &AppState,
    actor: &ActorContext,
    target: &GroupTarget,
    member_id: MembershipId,
) -> Result<Vec<MemberView>, CatalogueFailure> {
    let group = group_key(target)?;
    let grant = authorize(state, actor, &Requirement::ScopedAdmin(group.clone())).await?;

    let _locks = state
        .locks
        .acquire(&[OrderScope::Group(group.clone())])
        .await;
    let members = state.store.list_group(&group).await?;
    if !members.iter().any(|member| member.id == member_id) {
        return Err(CatalogueFailure::NotFound);
    }

    let survivors: Vec<MemberRecord> = members
        .iter()
        .filter(|member| member.id != member_id)
        .cloned()
        .collect();
    let assignments = compact(&member_slots(&survivors)).map_err(CatalogueFailure::invariant)?;

    let mut changes = ChangeSet::guarded(vec![ScopeGuard::group(group.clone(), &members)]);
    stage_member_positions(&survivors, &assignments, None, &mut changes);
    let positions: HashMap<MembershipId, u32> = assignments
        .iter()
        .map(|assignment| (assignment.id, assignment.position))
        .collect();
    let mut remaining: Vec<MemberView> = survivors
        .into_iter()
        .map(|mut member| {
            if let Some(position) = positions.get(&member.id) {
                member.position = *position;
            }
            MemberView::from(member)
        })
        .collect();
    changes.delete_members.push(member_id);
    changes.audit = Some(AuditEntry {
        action: "member.delete",
        actor_external_id: actor.external_id().clone(),
        target_id: member_id.to_string(),
        grant: grant.clone(),
        details: serde_json::json!({
            "group": group.as_str(),
            "remaining": remaining.len(),
        }),
    });
    state.store.commit(changes).await?;
    record_reorder(OrderScope::Group(group.clone()).metric_label(), "compact");

    tracing::info!(
        event = "member.delete",
        outcome = "committed",
        membership_id = %member_id,
        group = %group,
        grant = grant.as_str(),
    );
    remaining.sort_by_key(|member| member.position);
    Ok(remaining)
}

/// A group's members in display order. Reads need no authorization.
pub async fn list_group(
    state: &AppState,
    target: &GroupTarget,
) -> Result<Vec<MemberView>, CatalogueFailure> {
    let group = group_key(target)?;
    Ok(state
        .store
        .list_group(&group)
        .await?
        .into_iter()
        .map(MemberView::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use svge_core::{ActorContext, DenialReason, ExternalId, MembershipId};

    use super::{add_member, delete_member, group_key, list_group, update_member};
    use crate::catalogue::{
        core::{AppConfig, AppState},
        errors::CatalogueFailure,
        games::add_game,
        types::{GroupTarget, MemberUpdate, NewGame, NewMember},
    };

    const ADMIN_ROLE: &str = "Committee Admin";

    fn state() -> AppState {
        AppState::new(&AppConfig {
            admin_role_name: Some(String::from(ADMIN_ROLE)),
            ..AppConfig::default()
        })
        .unwrap()
    }

    fn actor(id: &str) -> ActorContext {
        ActorContext::new(ExternalId::try_from(id.to_owned()).unwrap())
    }

    fn admin() -> ActorContext {
        actor("1").with_role(ADMIN_ROLE)
    }

    async fn names(state: &AppState, target: &GroupTarget) -> Vec<(String, u32)> {
        list_group(state, target)
            .await
            .unwrap()
            .into_iter()
            .map(|member| (member.name.as_str().to_owned(), member.position))
            .collect()
    }

    #[test]
    fn reps_targets_derive_the_group_from_the_url() {
        let group = group_key(&GroupTarget::GameReps(String::from("Team-A"))).unwrap();
        assert_eq!(group.as_str(), "team-a_reps");
        assert!(group_key(&GroupTarget::Committee).unwrap().is_committee());
        assert!(matches!(
            group_key(&GroupTarget::GameReps(String::from("a/b"))),
            Err(CatalogueFailure::NotFound)
        ));
    }

    #[tokio::test]
    async fn committee_members_keep_a_dense_order() {
        let state = state();
        let target = GroupTarget::Committee;
        let x = add_member(&state, &admin(), &target, NewMember::new("11", "X"))
            .await
            .unwrap();
        let y = add_member(&state, &admin(), &target, NewMember::new("12", "Y"))
            .await
            .unwrap();
        add_member(&state, &admin(), &target, NewMember::new("13", "Z"))
            .await
            .unwrap();

        let remaining: Vec<(String, u32)> = delete_member(&state, &admin(), &target, y.id)
            .await
            .unwrap()
            .into_iter()
            .map(|member| (member.name.as_str().to_owned(), member.position))
            .collect();
        assert_eq!(
            remaining,
            vec![(String::from("X"), 1), (String::from("Z"), 2)]
        );
        assert_eq!(names(&state, &target).await, remaining);

        update_member(
            &state,
            &admin(),
            &target,
            x.id,
            MemberUpdate {
                position: Some(10),
                ..MemberUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            names(&state, &target).await,
            vec![(String::from("Z"), 1), (String::from("X"), 2)]
        );
    }

    #[tokio::test]
    async fn reps_need_an_existing_game() {
        let state = state();
        let failure = add_member(
            &state,
            &admin(),
            &GroupTarget::GameReps(String::from("ghost")),
            NewMember::new("11", "X"),
        )
        .await
        .unwrap_err();
        assert!(matches!(failure, CatalogueFailure::NotFound));
    }

    #[tokio::test]
    async fn an_identity_joins_a_group_once() {
        let state = state();
        add_member(&state, &admin(), &GroupTarget::Committee, NewMember::new("11", "X"))
            .await
            .unwrap();
        let failure = add_member(
            &state,
            &admin(),
            &GroupTarget::Committee,
            NewMember::new("11", "X again"),
        )
        .await
        .unwrap_err();
        assert!(matches!(failure, CatalogueFailure::Conflict(_)));
    }

    #[tokio::test]
    async fn reps_edit_themselves_but_not_each_other_outside_their_game() {
        let state = state();
        add_game(
            &state,
            &admin(),
            NewGame {
                name: String::from("Team A"),
                short_name: String::from("teamA"),
                ..NewGame::default()
            },
        )
        .await
        .unwrap();
        add_game(
            &state,
            &admin(),
            NewGame {
                name: String::from("Team B"),
                short_name: String::from("teamB"),
                ..NewGame::default()
            },
        )
        .await
        .unwrap();
        let team_a = GroupTarget::GameReps(String::from("teama"));
        let team_b = GroupTarget::GameReps(String::from("teamb"));
        let rep_a = add_member(&state, &admin(), &team_a, NewMember::new("21", "A rep"))
            .await
            .unwrap();
        let rep_b = add_member(&state, &admin(), &team_b, NewMember::new("22", "B rep"))
            .await
            .unwrap();

        let edited = update_member(
            &state,
            &actor("22"),
            &team_b,
            rep_b.id,
            MemberUpdate {
                title: Some(String::from("Captain")),
                ..MemberUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(edited.title, "Captain");

        let failure = update_member(
            &state,
            &actor("22"),
            &team_a,
            rep_a.id,
            MemberUpdate {
                title: Some(String::from("Demoted")),
                ..MemberUpdate::default()
            },
        )
        .await
        .unwrap_err();
        let CatalogueFailure::Forbidden(denial) = failure else {
            panic!("expected forbidden, got {failure:?}");
        };
        assert_eq!(denial.reason, DenialReason::InsufficientTier);
        assert_eq!(
            denial.to_string(),
            "requires self or scoped admin for teama_reps"
        );
    }

    #[tokio::test]
    async fn strangers_are_refused_before_any_write() {
        let state = state();
        let failure = add_member(
            &state,
            &actor("99"),
            &GroupTarget::Committee,
            NewMember::new("11", "X"),
        )
        .await
        .unwrap_err();
        let CatalogueFailure::Forbidden(denial) = failure else {
            panic!("expected forbidden, got {failure:?}");
        };
        assert_eq!(denial.reason, DenialReason::NoIdentityRecord);
        assert!(list_group(&state, &GroupTarget::Committee)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn a_null_message_clears_the_stored_one() {
        let state = state();
        let mut request = NewMember::new("11", "X");
        request.message = Some(String::from("Ask me about tournaments"));
        let committee = GroupTarget::Committee;
        let member = add_member(&state, &admin(), &committee, request)
            .await
            .unwrap();
        assert!(member.message.is_some());

        let untouched: MemberUpdate = serde_json::from_str(r#"{"title":"Chair"}"#).unwrap();
        let edited = update_member(&state, &actor("11"), &committee, member.id, untouched)
            .await
            .unwrap();
        assert_eq!(edited.message.as_deref(), Some("Ask me about tournaments"));

        let clear: MemberUpdate = serde_json::from_str(r#"{"message":null}"#).unwrap();
        let cleared = update_member(&state, &actor("11"), &committee, member.id, clear)
            .await
            .unwrap();
        assert_eq!(cleared.message, None);
        let stored = list_group(&state, &committee).await.unwrap();
        assert_eq!(stored[0].message, None);
        assert_eq!(stored[0].title, "Chair");
    }

    #[tokio::test]
    async fn unknown_members_are_not_found() {
        let state = state();
        assert!(matches!(
            delete_member(&state, &admin(), &GroupTarget::Committee, MembershipId::new()).await,
            Err(CatalogueFailure::NotFound)
        ));
    }
}
