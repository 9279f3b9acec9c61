pub(crate) mod access;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod errors;
pub(crate) mod games;
pub(crate) mod locks;
pub(crate) mod maintenance;
pub(crate) mod members;
pub(crate) mod metrics;
pub(crate) mod roles;
pub(crate) mod store;
pub(crate) mod types;

pub use self::core::{
    AppConfig, AppState, DEFAULT_DB_MAX_CONNECTIONS, DEFAULT_DISCORD_API_BASE,
    DEFAULT_ROLE_LOOKUP_TIMEOUT_SECS, MAX_ROLE_LOOKUP_TIMEOUT_SECS,
};
pub use errors::{init_tracing, CatalogueFailure};
pub use games::{add_game, delete_game, game_page, games_overview, update_game};
pub use maintenance::{
    prepare_storage, recent_audit_entries, verify_ordering, OrderingReport, ScopeViolation,
};
pub use members::{add_member, delete_member, list_group, update_member};
pub use metrics::render_metrics;
pub use roles::{build_role_directory, DiscordRoleDirectory, RoleDirectory, StaticRoleDirectory};
pub use types::{
    GamePage, GameUpdate, GameView, GamesOverview, GroupTarget, MemberUpdate, MemberView,
    NewGame, NewMember,
};
