use std::env;

use svge_catalogue::{
    add_game, add_member, delete_game, game_page, list_group, prepare_storage,
    recent_audit_entries, update_game, update_member, verify_ordering, ActorContext, AppConfig,
    AppState, CatalogueFailure, ExternalId, GameUpdate, GroupTarget, MemberUpdate, NewGame,
    NewMember,
};
use ulid::Ulid;

const ADMIN_ROLE: &str = "Committee Admin";

fn postgres_url() -> Option<String> {
    env::var("SVGE_TEST_DATABASE_URL").ok()
}

fn test_state(database_url: String) -> AppState {
    AppState::new(&AppConfig {
        database_url: Some(database_url),
        db_max_connections: 4,
        admin_role_name: Some(String::from(ADMIN_ROLE)),
        ..AppConfig::default()
    })
    .expect("state should build")
}

fn admin() -> ActorContext {
    ActorContext::new(ExternalId::try_from(String::from("1")).expect("id")).with_role(ADMIN_ROLE)
}

/// A short name that no earlier run against the same database used. Stays
/// within the 32 character limit for prefixes of up to five characters.
fn unique_short_name(prefix: &str) -> String {
    format!("{prefix} {}", Ulid::new().to_string().to_lowercase())
}

/// Both flows share one state so their games-collection commits are
/// serialized by the in-process locks instead of tripping each other's guards.
#[tokio::test]
async fn postgres_backed_catalogue_flow() {
    let Some(database_url) = postgres_url() else {
        eprintln!("skipping postgres-backed test: SVGE_TEST_DATABASE_URL is unset");
        return;
    };
    let state = test_state(database_url);
    prepare_storage(&state).await.expect("schema should apply");

    game_and_rep_flow(&state).await;
    concurrent_inserts_stay_dense(&state).await;
}

async fn game_and_rep_flow(state: &AppState) {
    let short_name = unique_short_name("pga");
    let game = add_game(
        state,
        &admin(),
        NewGame {
            name: format!("{short_name} full"),
            short_name: short_name.clone(),
            ..NewGame::default()
        },
    )
    .await
    .expect("game should insert");
    let reps = GroupTarget::GameReps(game.url.as_str().to_owned());

    let first = add_member(state, &admin(), &reps, NewMember::new("501", "First"))
        .await
        .expect("first rep");
    let second = add_member(state, &admin(), &reps, NewMember::new("502", "Second"))
        .await
        .expect("second rep");
    assert_eq!((first.position, second.position), (1, 2));

    let duplicate = add_member(state, &admin(), &reps, NewMember::new("501", "Again"))
        .await
        .expect_err("one entry per identity");
    assert!(matches!(duplicate, CatalogueFailure::Conflict(_)));

    update_member(
        state,
        &ActorContext::new(ExternalId::try_from(String::from("502")).expect("id")),
        &reps,
        second.id,
        MemberUpdate {
            position: Some(1),
            message: Some(Some(String::from("hello"))),
            ..MemberUpdate::default()
        },
    )
    .await
    .expect("rep reorders own group");
    let order: Vec<(String, u32)> = list_group(state, &reps)
        .await
        .expect("group")
        .into_iter()
        .map(|member| (member.name.as_str().to_owned(), member.position))
        .collect();
    assert_eq!(
        order,
        vec![(String::from("Second"), 1), (String::from("First"), 2)]
    );

    let renamed_short = unique_short_name("pgb");
    let renamed = update_game(
        state,
        &admin(),
        game.id,
        GameUpdate {
            short_name: Some(renamed_short.clone()),
            ..GameUpdate::default()
        },
    )
    .await
    .expect("rename cascades");
    let page = game_page(state, renamed.url.as_str(), None)
        .await
        .expect("renamed page");
    assert_eq!(page.reps.len(), 2);
    assert!(list_group(state, &reps).await.expect("old group").is_empty());

    let audit = recent_audit_entries(state, 1).await.expect("audit");
    assert_eq!(audit[0]["action"], "game.update");

    delete_game(state, &admin(), game.id)
        .await
        .expect("delete cascades");
    let renamed_reps = GroupTarget::GameReps(renamed.url.as_str().to_owned());
    assert!(list_group(state, &renamed_reps)
        .await
        .expect("renamed group")
        .is_empty());
    assert!(verify_ordering(state).await.expect("verify").is_clean());
}

async fn concurrent_inserts_stay_dense(state: &AppState) {
    let state = state.clone();
    let short_name = unique_short_name("pgc");
    let game = add_game(
        &state,
        &admin(),
        NewGame {
            name: format!("{short_name} full"),
            short_name,
            ..NewGame::default()
        },
    )
    .await
    .expect("game should insert");
    let reps = GroupTarget::GameReps(game.url.as_str().to_owned());

    let mut tasks = Vec::new();
    for index in 0..8_i64 {
        let state = state.clone();
        let reps = reps.clone();
        tasks.push(tokio::spawn(async move {
            let mut member = NewMember::new((600 + index).to_string(), format!("Rep {index}"));
            member.position = Some(1);
            add_member(&state, &admin(), &reps, member).await
        }));
    }
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("insert should succeed");
    }

    let positions: Vec<u32> = list_group(&state, &reps)
        .await
        .expect("group")
        .into_iter()
        .map(|member| member.position)
        .collect();
    assert_eq!(positions, (1..=8).collect::<Vec<u32>>());

    delete_game(&state, &admin(), game.id)
        .await
        .expect("cleanup");
}
