#![forbid(unsafe_code)]

//! Catalogue mutations for the society site: games and the committee and
//! representative listings, each kept in a dense display order and guarded
//! by tiered authorization.

mod catalogue;

pub use catalogue::{
    add_game, add_member, build_role_directory, delete_game, delete_member, game_page,
    games_overview, init_tracing, list_group, prepare_storage, recent_audit_entries,
    render_metrics, update_game, update_member, verify_ordering, AppConfig, AppState,
    CatalogueFailure, DiscordRoleDirectory, GamePage, GameUpdate, GameView, GamesOverview,
    GroupTarget, MemberUpdate, MemberView, NewGame, NewMember, OrderingReport, RoleDirectory,
    ScopeViolation, StaticRoleDirectory, DEFAULT_DB_MAX_CONNECTIONS, DEFAULT_DISCORD_API_BASE,
    DEFAULT_ROLE_LOOKUP_TIMEOUT_SECS, MAX_ROLE_LOOKUP_TIMEOUT_SECS,
};
pub use svge_core::{ActorContext, ExternalId, GameId, MembershipId};
