//! Sync orchestrator implementation.
//!
//! Each collection moves through:
//! FetchingSource -> Resolving -> FetchingDestination -> Diffing -> Applying -> Done
//!
//! Network stages are retried with bounded backoff. A stage that still fails
//! marks the collection Failed and the run moves on; fatal errors (auth,
//! cache) abort the run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backup::{
    self, BackupAlbum, BackupArtist, BackupDocument, BackupPlaylist, BackupTrack, Resolved,
};
use crate::cache::{MatchOutcome, MatchResult};
use crate::catalog::{
    CatalogError, CatalogProvider, Collection, CollectionKind, CollectionRef, SourceItem,
};
use crate::config::SyncConfig;
use crate::differ::{self, DiffOptions, SyncPlan};
use crate::matcher::{fingerprint, Matcher};

use super::retry::{backoff_delay, retry_with_backoff};
use super::types::{
    CollectionReport, ErroredItem, Selection, SkippedItem, SyncError, SyncReport, SyncStage,
    UnresolvedItem,
};

/// Resolution of one source item after retries.
enum ItemOutcome {
    Resolved(MatchResult),
    Errored(String),
}

/// Where the source items of a collection come from.
enum SourceData<'a> {
    Fetch(&'a dyn CatalogProvider),
    Loaded(Vec<SourceItem>),
}

/// Per-run destination state.
struct RunContext {
    destination: Arc<dyn CatalogProvider>,
    /// Destination playlists, listed on first use.
    playlists: Option<Vec<CollectionRef>>,
}

impl RunContext {
    fn new(destination: Arc<dyn CatalogProvider>) -> Self {
        Self {
            destination,
            playlists: None,
        }
    }
}

/// Drives library migration from a source catalog to a destination catalog.
pub struct SyncOrchestrator {
    source: Option<Arc<dyn CatalogProvider>>,
    destination: Option<Arc<dyn CatalogProvider>>,
    matcher: Arc<Matcher>,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(matcher: Arc<Matcher>, config: SyncConfig) -> Self {
        Self {
            source: None,
            destination: None,
            matcher,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CatalogProvider>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: Arc<dyn CatalogProvider>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Setting the flag stops the run before the next collection. Work already
    /// applied stays applied.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn source(&self) -> Result<Arc<dyn CatalogProvider>, SyncError> {
        self.source
            .clone()
            .ok_or(SyncError::ProviderNotConfigured("source"))
    }

    fn destination(&self) -> Result<Arc<dyn CatalogProvider>, SyncError> {
        self.destination
            .clone()
            .ok_or(SyncError::ProviderNotConfigured("destination"))
    }

    fn is_excluded(&self, reference: &CollectionRef) -> bool {
        self.config
            .excluded_playlists
            .iter()
            .any(|e| *e == reference.id || *e == reference.name)
    }

    fn mapped_destination(&self, source_id: &str) -> Option<&str> {
        self.config
            .playlists
            .iter()
            .find(|m| m.source == source_id)
            .and_then(|m| m.destination.as_deref())
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Sync one playlist given by native ID or share URI.
    pub async fn sync_playlist(&self, uri: &str) -> Result<SyncReport, SyncError> {
        let source = self.source()?;
        let mut ctx = RunContext::new(self.destination()?);
        let mut report = SyncReport::new(self.config.dry_run);

        let mapped = self.mapped_destination(uri).map(str::to_string);
        let collection = self
            .playlist_by_uri(&mut ctx, source.as_ref(), uri, mapped.as_deref())
            .await?;
        report.collections.push(collection);

        self.finish_run(report)
    }

    pub async fn sync_favorites(&self) -> Result<SyncReport, SyncError> {
        self.sync_library(CollectionRef::favorite_tracks()).await
    }

    pub async fn sync_albums(&self) -> Result<SyncReport, SyncError> {
        self.sync_library(CollectionRef::saved_albums()).await
    }

    pub async fn sync_artists(&self) -> Result<SyncReport, SyncError> {
        self.sync_library(CollectionRef::followed_artists()).await
    }

    /// Sync every selected part of the library.
    ///
    /// When `sync.playlists` mappings are configured only those playlists
    /// are synced; otherwise every source playlist not excluded.
    pub async fn sync_all(&self, selection: Selection) -> Result<SyncReport, SyncError> {
        let source = self.source()?;
        let destination = self.destination()?;
        info!(
            "Starting sync from {} to {}{}",
            source.name(),
            destination.name(),
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        let mut ctx = RunContext::new(destination);
        let mut report = SyncReport::new(self.config.dry_run);

        if selection.playlists {
            if self.config.playlists.is_empty() {
                self.sync_source_playlists(&mut ctx, source.as_ref(), &mut report)
                    .await?;
            } else {
                for mapping in &self.config.playlists {
                    if self.is_cancelled() {
                        report.collections.push(
                            CollectionReport::new(&mapping.source, CollectionKind::Playlist)
                                .skipped("run cancelled"),
                        );
                        continue;
                    }
                    let collection = self
                        .playlist_by_uri(
                            &mut ctx,
                            source.as_ref(),
                            &mapping.source,
                            mapping.destination.as_deref(),
                        )
                        .await?;
                    report.collections.push(collection);
                }
            }
        }

        for reference in library_collections(selection) {
            let collection = if self.is_cancelled() {
                CollectionReport::new(&reference.name, reference.kind).skipped("run cancelled")
            } else {
                self.run_collection(&mut ctx, reference, SourceData::Fetch(source.as_ref()), None)
                    .await?
            };
            report.collections.push(collection);
        }

        self.finish_run(report)
    }

    /// Write the selected parts of the source library to a backup file.
    ///
    /// Items already resolved in the match cache carry a `resolved` block
    /// when a destination provider is configured.
    pub async fn export_to_backup(
        &self,
        path: &Path,
        selection: Selection,
    ) -> Result<BackupDocument, SyncError> {
        let source = self.source()?;
        let policy = &self.config.retry;
        let user = retry_with_backoff(policy, "fetch current user", || source.current_user()).await?;

        let mut document = BackupDocument::new(source.name(), user);
        document.destination_provider = self.destination.as_ref().map(|d| d.name().to_string());
        info!("Exporting {} library to {}", source.name(), path.display());

        if selection.playlists {
            let listed =
                retry_with_backoff(policy, "list playlists", || source.list_playlists()).await?;
            let mut failed = Vec::new();
            for reference in listed {
                if self.is_excluded(&reference) {
                    debug!("Not exporting excluded playlist '{}'", reference.name);
                    continue;
                }
                let fetched = retry_with_backoff(policy, "fetch playlist", || {
                    source.get_collection(&reference)
                })
                .await;
                let collection = match fetched {
                    Ok(collection) => collection,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!("Not exporting playlist '{}': {}", reference.name, e);
                        failed.push(reference.name);
                        continue;
                    }
                };
                document.playlists.push(BackupPlaylist {
                    id: reference.id.clone(),
                    name: reference.name.clone(),
                    description: reference.description.clone().unwrap_or_default(),
                    tracks: self.backup_tracks(&collection.items)?,
                });
            }
            if !failed.is_empty() {
                warn!(
                    "{} playlists left out of the backup: {}",
                    failed.len(),
                    failed.join(", ")
                );
            }
        }

        for reference in library_collections(selection) {
            let collection = retry_with_backoff(policy, "fetch library collection", || {
                source.get_collection(&reference)
            })
            .await?;
            match reference.kind {
                CollectionKind::FavoriteTracks => {
                    document.favorites = self.backup_tracks(&collection.items)?;
                }
                CollectionKind::SavedAlbums => {
                    for item in &collection.items {
                        if let SourceItem::Album(album) = item {
                            let mut entry = BackupAlbum::from_album(album);
                            entry.resolved = self.cached_resolution(item)?;
                            document.albums.push(entry);
                        }
                    }
                }
                CollectionKind::FollowedArtists => {
                    for item in &collection.items {
                        if let SourceItem::Artist(artist) = item {
                            let mut entry = BackupArtist::from_artist(artist);
                            entry.resolved = self.cached_resolution(item)?;
                            document.artists.push(entry);
                        }
                    }
                }
                CollectionKind::Playlist => {}
            }
        }

        backup::write_backup(path, &document)?;
        info!(
            "Exported {} playlists, {} tracks, {} albums, {} artists",
            document.playlists.len(),
            document.track_count(),
            document.albums.len(),
            document.artists.len()
        );
        Ok(document)
    }

    /// Sync the selected parts of a backup file into the destination.
    ///
    /// Integrity errors abort before anything is written. Resolutions stored
    /// in the backup seed the match cache when they refer to this
    /// destination provider.
    pub async fn import_from_backup(
        &self,
        path: &Path,
        selection: Selection,
    ) -> Result<SyncReport, SyncError> {
        let destination = self.destination()?;
        let document = backup::load_backup(path)?;
        info!(
            "Importing backup from {} ({} playlists, {} favorites, {} albums, {} artists)",
            path.display(),
            document.playlists.len(),
            document.favorites.len(),
            document.albums.len(),
            document.artists.len()
        );

        if document.destination_provider.as_deref() == Some(destination.name()) {
            let seeded = self.seed_cache(&document)?;
            info!("Seeded {} cached resolutions from backup", seeded);
        }

        let mut ctx = RunContext::new(destination);
        let mut report = SyncReport::new(self.config.dry_run);

        if selection.playlists {
            for playlist in &document.playlists {
                let reference = playlist.reference();
                let collection = if self.is_cancelled() {
                    CollectionReport::new(&reference.name, reference.kind).skipped("run cancelled")
                } else if self.is_excluded(&reference) {
                    CollectionReport::new(&reference.name, reference.kind)
                        .skipped("excluded by configuration")
                } else {
                    let mapped = self.mapped_destination(&playlist.id);
                    let (items, skipped) = backup_track_items(&playlist.tracks);
                    let synced = self
                        .run_collection(&mut ctx, reference, SourceData::Loaded(items), mapped)
                        .await?;
                    with_skipped(synced, skipped)
                };
                report.collections.push(collection);
            }
        }

        for reference in library_collections(selection) {
            let mut skipped = Vec::new();
            let items: Vec<SourceItem> = match reference.kind {
                CollectionKind::FavoriteTracks => {
                    let (items, without_id) = backup_track_items(&document.favorites);
                    skipped = without_id;
                    items
                }
                CollectionKind::SavedAlbums => document
                    .albums
                    .iter()
                    .map(|a| SourceItem::Album(a.to_album()))
                    .collect(),
                CollectionKind::FollowedArtists => document
                    .artists
                    .iter()
                    .map(|a| SourceItem::Artist(a.to_artist()))
                    .collect(),
                CollectionKind::Playlist => Vec::new(),
            };

            let collection = if items.is_empty() {
                // An absent section must not empty the destination in mirror mode.
                CollectionReport::new(&reference.name, reference.kind).skipped("not in backup")
            } else if self.is_cancelled() {
                CollectionReport::new(&reference.name, reference.kind).skipped("run cancelled")
            } else {
                self.run_collection(&mut ctx, reference, SourceData::Loaded(items), None)
                    .await?
            };
            report.collections.push(with_skipped(collection, skipped));
        }

        self.finish_run(report)
    }

    // ========================================================================
    // Run helpers
    // ========================================================================

    async fn sync_library(&self, reference: CollectionRef) -> Result<SyncReport, SyncError> {
        let source = self.source()?;
        let mut ctx = RunContext::new(self.destination()?);
        let mut report = SyncReport::new(self.config.dry_run);

        let collection = self
            .run_collection(&mut ctx, reference, SourceData::Fetch(source.as_ref()), None)
            .await?;
        report.collections.push(collection);

        self.finish_run(report)
    }

    async fn sync_source_playlists(
        &self,
        ctx: &mut RunContext,
        source: &dyn CatalogProvider,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let listed = retry_with_backoff(&self.config.retry, "list source playlists", || {
            source.list_playlists()
        })
        .await;
        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                let failed = self.stage_failure(
                    CollectionReport::new("playlists", CollectionKind::Playlist),
                    SyncStage::FetchingSource,
                    e.into(),
                )?;
                report.collections.push(failed);
                return Ok(());
            }
        };
        info!("Found {} playlists in {}", listed.len(), source.name());

        for reference in listed {
            let collection = if self.is_cancelled() {
                CollectionReport::new(&reference.name, reference.kind).skipped("run cancelled")
            } else if self.is_excluded(&reference) {
                info!("Skipping excluded playlist '{}'", reference.name);
                CollectionReport::new(&reference.name, reference.kind)
                    .skipped("excluded by configuration")
            } else {
                let mapped = self.mapped_destination(&reference.id).map(str::to_string);
                self.run_collection(ctx, reference, SourceData::Fetch(source), mapped.as_deref())
                    .await?
            };
            report.collections.push(collection);
        }
        Ok(())
    }

    async fn playlist_by_uri(
        &self,
        ctx: &mut RunContext,
        source: &dyn CatalogProvider,
        uri: &str,
        mapped: Option<&str>,
    ) -> Result<CollectionReport, SyncError> {
        let fetched = retry_with_backoff(&self.config.retry, "fetch playlist", || {
            source.get_playlist(uri)
        })
        .await;
        match fetched {
            Ok(Collection { reference, items }) => {
                self.run_collection(ctx, reference, SourceData::Loaded(items), mapped)
                    .await
            }
            Err(e) => self.stage_failure(
                CollectionReport::new(uri, CollectionKind::Playlist),
                SyncStage::FetchingSource,
                e.into(),
            ),
        }
    }

    /// Sync one collection, then flush the cache whatever the outcome.
    async fn run_collection(
        &self,
        ctx: &mut RunContext,
        reference: CollectionRef,
        data: SourceData<'_>,
        mapped: Option<&str>,
    ) -> Result<CollectionReport, SyncError> {
        let outcome = self.sync_collection(ctx, reference, data, mapped).await;
        let flushed = self.flush_cache();
        let report = outcome?;
        flushed?;
        Ok(report)
    }

    async fn sync_collection(
        &self,
        ctx: &mut RunContext,
        reference: CollectionRef,
        data: SourceData<'_>,
        mapped: Option<&str>,
    ) -> Result<CollectionReport, SyncError> {
        let policy = &self.config.retry;
        let destination = ctx.destination.clone();
        let mut report = CollectionReport::new(&reference.name, reference.kind);
        info!("Syncing {} '{}'", reference.kind, reference.name);

        // FetchingSource
        let items = match data {
            SourceData::Loaded(items) => items,
            SourceData::Fetch(source) => {
                let fetched = retry_with_backoff(policy, "fetch source collection", || {
                    source.get_collection(&reference)
                })
                .await;
                match fetched {
                    Ok(collection) => collection.items,
                    Err(e) => {
                        return self.stage_failure(report, SyncStage::FetchingSource, e.into())
                    }
                }
            }
        };
        report.total = items.len();
        if items.is_empty() && reference.kind == CollectionKind::Playlist {
            info!("Skipping empty playlist '{}'", reference.name);
            return Ok(report.skipped("empty playlist"));
        }

        // Resolving
        let outcomes = self.resolve_items(&items, &destination).await?;
        let mut results = Vec::with_capacity(items.len());
        for (item, outcome) in items.iter().zip(outcomes) {
            match outcome {
                ItemOutcome::Resolved(result) => {
                    if result.is_match() {
                        report.matched += 1;
                    } else {
                        debug!("No match for {} in {}", item.display_name(), destination.name());
                        report.unmatched.push(UnresolvedItem {
                            source_id: item.id().to_string(),
                            name: item.display_name(),
                            best_confidence: result.confidence,
                        });
                    }
                    results.push(result);
                }
                ItemOutcome::Errored(reason) => report.errored.push(ErroredItem {
                    source_id: item.id().to_string(),
                    name: item.display_name(),
                    reason,
                }),
            }
        }
        info!(
            "Resolved '{}': {} matched, {} unmatched, {} errored of {}",
            reference.name,
            report.matched,
            report.unmatched.len(),
            report.errored.len(),
            report.total
        );

        // FetchingDestination
        let target = match self.destination_target(ctx, &reference, mapped).await {
            Ok(target) => target,
            Err(e) => return self.stage_failure(report, SyncStage::FetchingDestination, e),
        };
        let current = match &target {
            Some(target) => {
                let fetched = retry_with_backoff(policy, "fetch destination collection", || {
                    destination.get_collection(target)
                })
                .await;
                match fetched {
                    Ok(collection) => collection.item_ids(),
                    Err(e) => {
                        return self.stage_failure(
                            report,
                            SyncStage::FetchingDestination,
                            e.into(),
                        )
                    }
                }
            }
            None => Vec::new(),
        };
        report.destination_id = target.as_ref().map(|t| t.id.clone());

        // Diffing
        let mut options = DiffOptions {
            mirror: self.config.mirror,
            ordering: self.config.playlist_ordering,
        };
        if options.mirror && !report.errored.is_empty() {
            warn!(
                "{} items of '{}' failed to resolve, skipping mirror removals",
                report.errored.len(),
                reference.name
            );
            options.mirror = false;
        }
        let plan_target = target.clone().unwrap_or_else(|| reference.clone());
        let plan = differ::diff(&plan_target, &results, &current, &options);
        report.added = plan.addition_count();
        report.removed = plan.removals.len();
        report.rebuilt = plan.rebuild;

        if plan.is_empty() {
            info!("'{}' is up to date", reference.name);
            return Ok(report);
        }
        if self.config.dry_run {
            info!(
                "Dry run: would add {} and remove {} in '{}'",
                report.added, report.removed, reference.name
            );
            return Ok(report);
        }

        // Applying
        let target = match target {
            Some(target) => target,
            None => {
                let description = reference.description.as_deref();
                let created = retry_with_backoff(policy, "create playlist", || {
                    destination.create_playlist(&reference.name, description)
                })
                .await;
                match created {
                    Ok(created) => {
                        info!("Created playlist '{}' in {}", created.name, destination.name());
                        if let Some(playlists) = ctx.playlists.as_mut() {
                            playlists.push(created.clone());
                        }
                        report.destination_id = Some(created.id.clone());
                        created
                    }
                    Err(e) => return self.stage_failure(report, SyncStage::Applying, e.into()),
                }
            }
        };
        let applied = self
            .apply_until_converged(destination.as_ref(), &target, plan, &results, &options)
            .await;
        if let Err(e) = applied {
            return self.stage_failure(report, SyncStage::Applying, e);
        }

        info!(
            "Synced '{}': added {}, removed {}{}",
            reference.name,
            report.added,
            report.removed,
            if report.rebuilt { " (rebuilt order)" } else { "" }
        );
        Ok(report)
    }

    /// Resolve all items with bounded concurrency, one lookup per
    /// fingerprint. Outcomes are returned in item order.
    async fn resolve_items(
        &self,
        items: &[SourceItem],
        destination: &Arc<dyn CatalogProvider>,
    ) -> Result<Vec<ItemOutcome>, SyncError> {
        let mut keys: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<SourceItem> = Vec::new();
        let mut slots = Vec::with_capacity(items.len());
        for item in items {
            // overrides are keyed by source ID, so those items keep their own lookup
            let key = if self.matcher.has_override(item.id()) {
                format!("override:{}", item.id())
            } else {
                fingerprint(item).as_str().to_string()
            };
            let slot = *keys.entry(key).or_insert_with(|| {
                unique.push(item.clone());
                unique.len() - 1
            });
            slots.push(slot);
        }
        debug!(
            "Resolving {} unique items ({} total)",
            unique.len(),
            items.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (index, item) in unique.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let matcher = self.matcher.clone();
            let destination = destination.clone();
            let policy = self.config.retry.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let what = format!("resolve {}", item.display_name());
                let result = retry_with_backoff(&policy, &what, || {
                    matcher.resolve(&item, destination.as_ref())
                })
                .await;
                (index, item, result)
            });
        }

        let mut resolved: Vec<Option<ItemOutcome>> = (0..keys.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(result))) => resolved[index] = Some(ItemOutcome::Resolved(result)),
                Ok((_, item, Err(e))) if e.is_fatal() => {
                    error!("Aborting: resolving {} failed: {}", item.display_name(), e);
                    tasks.abort_all();
                    return Err(e.into());
                }
                Ok((index, item, Err(e))) => {
                    warn!("Giving up on {}: {}", item.display_name(), e);
                    resolved[index] = Some(ItemOutcome::Errored(e.to_string()));
                }
                Err(e) => error!("Resolution task failed: {}", e),
            }
        }

        Ok(items
            .iter()
            .zip(slots)
            .map(|(item, slot)| match &resolved[slot] {
                Some(ItemOutcome::Resolved(result)) => {
                    ItemOutcome::Resolved(result.for_source(item.id()))
                }
                Some(ItemOutcome::Errored(reason)) => ItemOutcome::Errored(reason.clone()),
                None => ItemOutcome::Errored("resolution task failed".to_string()),
            })
            .collect())
    }

    /// Destination collection for a source collection. `None` means a
    /// playlist that does not exist yet.
    async fn destination_target(
        &self,
        ctx: &mut RunContext,
        reference: &CollectionRef,
        mapped: Option<&str>,
    ) -> Result<Option<CollectionRef>, SyncError> {
        if reference.kind != CollectionKind::Playlist {
            return Ok(Some(library_collection(reference)));
        }
        if let Some(id) = mapped {
            return Ok(Some(CollectionRef::playlist(id, &reference.name)));
        }

        if ctx.playlists.is_none() {
            let destination = ctx.destination.clone();
            let listed = retry_with_backoff(&self.config.retry, "list destination playlists", || {
                destination.list_playlists()
            })
            .await?;
            ctx.playlists = Some(listed);
        }
        Ok(ctx
            .playlists
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|p| p.name == reference.name)
            .cloned())
    }

    /// Apply `plan`, and after a transient failure re-read the destination
    /// and re-plan before the next attempt. A write call can fail after some
    /// of its batches were committed; replaying it would add those twice.
    async fn apply_until_converged(
        &self,
        destination: &dyn CatalogProvider,
        target: &CollectionRef,
        mut plan: SyncPlan,
        results: &[MatchResult],
        options: &DiffOptions,
    ) -> Result<(), SyncError> {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            let err = match apply(destination, target, &plan).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !err.is_transient() || attempt >= policy.max_attempts {
                return Err(err.into());
            }
            let delay = err
                .retry_after()
                .unwrap_or_else(|| backoff_delay(policy, attempt));
            warn!(
                "Writing '{}' failed (attempt {}/{}): {}; re-planning in {:?}",
                target.name, attempt, policy.max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;

            let current = retry_with_backoff(policy, "fetch destination collection", || {
                destination.get_collection(target)
            })
            .await?;
            plan = differ::diff(target, results, &current.item_ids(), options);
            if plan.is_empty() {
                return Ok(());
            }
        }
    }

    /// Non-fatal errors fail the collection; fatal ones abort the run.
    fn stage_failure(
        &self,
        report: CollectionReport,
        stage: SyncStage,
        err: SyncError,
    ) -> Result<CollectionReport, SyncError> {
        if err.is_fatal() {
            error!("Aborting run while {} '{}': {}", stage, report.name, err);
            return Err(err);
        }
        warn!("'{}' failed while {}: {}", report.name, stage, err);
        Ok(report.failed(stage, err))
    }

    fn flush_cache(&self) -> Result<(), SyncError> {
        let written = self.matcher.cache().flush()?;
        if written > 0 {
            debug!("Flushed {} match cache entries", written);
        }
        Ok(())
    }

    fn finish_run(&self, report: SyncReport) -> Result<SyncReport, SyncError> {
        self.flush_cache()?;
        let report = report.finish();
        info!(
            "Run {} finished: {} collections, {} matched, {} unmatched, {} errored",
            report.run_id,
            report.collections.len(),
            report.total_matched(),
            report.total_unmatched(),
            report.total_errored()
        );
        if report.has_failures() {
            warn!("Some collections failed, see the report for details");
        }
        Ok(report)
    }

    // ========================================================================
    // Backup helpers
    // ========================================================================

    fn cached_resolution(&self, item: &SourceItem) -> Result<Option<Resolved>, SyncError> {
        if self.destination.is_none() {
            return Ok(None);
        }
        let cached = self.matcher.cache().get(&fingerprint(item))?;
        Ok(cached.as_ref().map(Resolved::from))
    }

    fn backup_tracks(&self, items: &[SourceItem]) -> Result<Vec<BackupTrack>, SyncError> {
        let mut tracks = Vec::with_capacity(items.len());
        for item in items {
            if let SourceItem::Track(track) = item {
                let mut entry = BackupTrack::from_track(track);
                entry.resolved = self.cached_resolution(item)?;
                tracks.push(entry);
            }
        }
        Ok(tracks)
    }

    /// Store backup resolutions for fingerprints the cache does not know yet.
    fn seed_cache(&self, document: &BackupDocument) -> Result<usize, SyncError> {
        let mut entries: Vec<(SourceItem, &Resolved)> = Vec::new();
        let tracks = document
            .playlists
            .iter()
            .flat_map(|p| p.tracks.iter())
            .chain(document.favorites.iter());
        for track in tracks {
            if let (Some(t), Some(resolved)) = (track.to_track(), track.resolved.as_ref()) {
                entries.push((SourceItem::Track(t), resolved));
            }
        }
        for album in &document.albums {
            if let Some(resolved) = &album.resolved {
                entries.push((SourceItem::Album(album.to_album()), resolved));
            }
        }
        for artist in &document.artists {
            if let Some(resolved) = &artist.resolved {
                entries.push((SourceItem::Artist(artist.to_artist()), resolved));
            }
        }

        let cache = self.matcher.cache();
        let mut seeded = 0;
        for (item, resolved) in entries {
            let fp = fingerprint(&item);
            if cache.get(&fp)?.is_some() {
                continue;
            }
            let result = match resolved.outcome() {
                MatchOutcome::Matched { destination_id } => MatchResult::matched(
                    fp,
                    item.id(),
                    item.kind(),
                    destination_id,
                    resolved.confidence,
                    resolved.method,
                ),
                MatchOutcome::NoMatch => MatchResult::no_match(
                    fp,
                    item.id(),
                    item.kind(),
                    resolved.confidence,
                    resolved.method,
                ),
            };
            cache.put(result)?;
            seeded += 1;
        }
        cache.flush()?;
        Ok(seeded)
    }
}

/// Removals first, then insertions in plan order. No retries: a failed
/// call may have partly landed.
async fn apply(
    destination: &dyn CatalogProvider,
    target: &CollectionRef,
    plan: &SyncPlan,
) -> Result<(), CatalogError> {
    if !plan.removals.is_empty() {
        destination.remove_items(target, &plan.removals).await?;
    }
    for insertion in &plan.insertions {
        destination
            .add_items(target, &insertion.ids, insertion.position)
            .await?;
    }
    Ok(())
}

/// Source items for backup tracks, plus the tracks that cannot be synced
/// because the backup has no ID for them.
fn backup_track_items(tracks: &[BackupTrack]) -> (Vec<SourceItem>, Vec<SkippedItem>) {
    let mut items = Vec::with_capacity(tracks.len());
    let mut skipped = Vec::new();
    for track in tracks {
        match track.to_track() {
            Some(t) => items.push(SourceItem::Track(t)),
            None => skipped.push(SkippedItem {
                name: track.name.clone(),
                reason: "no track ID in backup".to_string(),
            }),
        }
    }
    (items, skipped)
}

fn with_skipped(mut report: CollectionReport, skipped: Vec<SkippedItem>) -> CollectionReport {
    if !skipped.is_empty() {
        warn!(
            "{} entries of '{}' have no ID and were skipped",
            skipped.len(),
            report.name
        );
        report.total += skipped.len();
        report.skipped = skipped;
    }
    report
}

/// The destination's own collection of the same kind. Playlists map to
/// themselves.
fn library_collection(reference: &CollectionRef) -> CollectionRef {
    match reference.kind {
        CollectionKind::FavoriteTracks => CollectionRef::favorite_tracks(),
        CollectionKind::SavedAlbums => CollectionRef::saved_albums(),
        CollectionKind::FollowedArtists => CollectionRef::followed_artists(),
        CollectionKind::Playlist => reference.clone(),
    }
}

/// Library collections covered by a selection, in sync order.
fn library_collections(selection: Selection) -> Vec<CollectionRef> {
    let mut refs = Vec::new();
    if selection.favorites {
        refs.push(CollectionRef::favorite_tracks());
    }
    if selection.albums {
        refs.push(CollectionRef::saved_albums());
    }
    if selection.artists {
        refs.push(CollectionRef::followed_artists());
    }
    refs
}
