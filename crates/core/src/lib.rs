pub mod backup;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod differ;
pub mod matcher;
pub mod orchestrator;
pub mod testing;

pub use backup::{load_backup, parse_backup, write_backup, BackupDocument, BackupError};
pub use cache::{
    CacheError, CacheStats, Fingerprint, MatchCache, MatchMethod, MatchOutcome, MatchResult,
    MemoryMatchCache, SqliteMatchCache,
};
pub use catalog::{build_provider, CatalogError, CatalogProvider, SpotifyClient, TidalClient};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ProviderKind,
    SanitizedConfig,
};
pub use differ::{diff, DiffOptions, PlaylistOrdering, SyncPlan};
pub use matcher::{MatchError, Matcher};
pub use orchestrator::{CollectionReport, Selection, SyncError, SyncOrchestrator, SyncReport};
