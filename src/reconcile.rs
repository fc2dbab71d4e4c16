//! Reconciliation engine: diffs the discovery cache, the managed-state
//! store, and the external store's app list, then applies add/remove
//! mutations one candidate at a time.
//!
//! Planning settles everything it can without touching the external store:
//! ids that are already managed, not managed, unknown, or filtered out
//! become pre-resolved outcomes. Application is strictly per-candidate; a
//! candidate that fails is reported and the batch moves on, and an
//! interrupted batch leaves both stores consistent with the applied prefix.
//! Whenever the external store and local state disagree, the external store
//! wins.

use crate::apollo::{AddOutcome, ExternalStore, RemoveOutcome};
use crate::app::{format_id, AppKind, AppRecord, Source};
use crate::cache::CacheSnapshot;
use crate::covers::CoverPipeline;
use crate::managed::{ManagedEntry, ManagedStore};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Candidate predicate; unset fields match everything, set fields AND.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub source: Option<Source>,
    pub kind: Option<AppKind>,
    /// Case-insensitive name substring.
    pub search: Option<String>,
    pub managed: Option<bool>,
}

impl Filters {
    pub fn matches(&self, record: &AppRecord, is_managed: bool) -> bool {
        if let Some(source) = self.source {
            if record.source != source {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !record
                .name
                .to_lowercase()
                .contains(&search.to_lowercase())
            {
                return false;
            }
        }
        if let Some(want) = self.managed {
            if is_managed != want {
                return false;
            }
        }
        true
    }
}

/// Which ids an operation applies to.
#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Ids(Vec<Uuid>),
}

impl Selection {
    pub fn includes(&self, id: &Uuid) -> bool {
        match self {
            Selection::All => true,
            Selection::Ids(ids) => ids.contains(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
}

#[derive(Debug)]
pub enum PlannedMutation {
    Add(AppRecord),
    Remove(ManagedEntry),
}

impl PlannedMutation {
    pub fn id(&self) -> Uuid {
        match self {
            PlannedMutation::Add(record) => record.id,
            PlannedMutation::Remove(entry) => entry.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PlannedMutation::Add(record) => &record.name,
            PlannedMutation::Remove(entry) => &entry.name,
        }
    }
}

/// Ordered mutations plus the outcomes settled during planning.
#[derive(Debug)]
pub struct Plan {
    pub action: Action,
    pub mutations: Vec<PlannedMutation>,
    pub resolved: Vec<CandidateReport>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Final status of one candidate.
#[derive(Debug)]
pub struct CandidateReport {
    pub id: Uuid,
    pub name: String,
    pub outcome: CandidateOutcome,
}

#[derive(Debug)]
pub enum CandidateOutcome {
    /// Pushed externally and recorded locally. `cover_error` is set when
    /// the app went in without usable cover art.
    Added { cover_error: Option<String> },
    AlreadyManaged,
    Removed,
    NotManaged,
    /// The external store had already dropped this id; local state was
    /// purged to match.
    ConflictPurged,
    UnknownId,
    FilteredOut,
    Failed(String),
}

impl CandidateOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CandidateOutcome::Failed(_))
    }
}

pub struct Reconciler<'a> {
    cache: &'a CacheSnapshot,
    managed: &'a ManagedStore,
    covers: &'a CoverPipeline,
    external: &'a mut dyn ExternalStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        cache: &'a CacheSnapshot,
        managed: &'a ManagedStore,
        covers: &'a CoverPipeline,
        external: &'a mut dyn ExternalStore,
    ) -> Self {
        Reconciler {
            cache,
            managed,
            covers,
            external,
        }
    }

    /// Plans additions: cached records matching the filters that are not
    /// yet managed. Explicitly selected ids that cannot be added resolve to
    /// their reason instead of disappearing silently.
    pub fn plan_add(&self, selection: &Selection, filters: &Filters) -> Result<Plan> {
        let managed_ids = self.managed_ids()?;
        let mut mutations = Vec::new();
        let mut resolved = Vec::new();

        match selection {
            Selection::All => {
                for record in self.cache.records() {
                    let is_managed = managed_ids.contains(&record.id);
                    if !filters.matches(record, is_managed) || is_managed {
                        continue;
                    }
                    mutations.push(PlannedMutation::Add(record.clone()));
                }
            }
            Selection::Ids(ids) => {
                let mut seen = HashSet::new();
                for id in ids {
                    if !seen.insert(*id) {
                        continue;
                    }
                    match self.cache.get(id) {
                        None => resolved.push(CandidateReport {
                            id: *id,
                            name: format_id(id),
                            outcome: CandidateOutcome::UnknownId,
                        }),
                        Some(record) => {
                            let is_managed = managed_ids.contains(id);
                            let outcome = if is_managed {
                                Some(CandidateOutcome::AlreadyManaged)
                            } else if !filters.matches(record, is_managed) {
                                Some(CandidateOutcome::FilteredOut)
                            } else {
                                None
                            };
                            match outcome {
                                Some(outcome) => resolved.push(CandidateReport {
                                    id: record.id,
                                    name: record.name.clone(),
                                    outcome,
                                }),
                                None => mutations.push(PlannedMutation::Add(record.clone())),
                            }
                        }
                    }
                }
            }
        }

        mutations.sort_by_key(PlannedMutation::id);
        Ok(Plan {
            action: Action::Add,
            mutations,
            resolved,
        })
    }

    /// Plans removals from the managed set. Ids selected but not managed
    /// resolve to `NotManaged` without an external-store call.
    pub fn plan_remove(&self, selection: &Selection, filters: &Filters) -> Result<Plan> {
        let entries = self
            .managed
            .list()
            .context("Failed to read the managed-state store")?;
        let managed_ids: HashSet<Uuid> = entries.iter().map(|e| e.id).collect();

        let mut mutations = Vec::new();
        let mut resolved = Vec::new();

        if let Selection::Ids(ids) = selection {
            let mut seen = HashSet::new();
            for id in ids {
                if seen.insert(*id) && !managed_ids.contains(id) {
                    resolved.push(CandidateReport {
                        id: *id,
                        name: format_id(id),
                        outcome: CandidateOutcome::NotManaged,
                    });
                }
            }
        }

        for entry in entries {
            if !selection.includes(&entry.id) {
                continue;
            }
            let matches = match self.cache.get(&entry.id) {
                Some(record) => filters.matches(record, true),
                None => entry_matches(filters, &entry),
            };
            if !matches {
                continue;
            }
            mutations.push(PlannedMutation::Remove(entry));
        }

        mutations.sort_by_key(PlannedMutation::id);
        Ok(Plan {
            action: Action::Remove,
            mutations,
            resolved,
        })
    }

    /// Applies the plan candidate by candidate. External-store failures mark
    /// the candidate and continue; only a managed-store write failure aborts,
    /// leaving the stores consistent with the applied prefix.
    pub fn apply(&mut self, plan: Plan) -> Result<Vec<CandidateReport>> {
        let mut reports = plan.resolved;
        for mutation in plan.mutations {
            let report = match mutation {
                PlannedMutation::Add(record) => self.apply_add(record)?,
                PlannedMutation::Remove(entry) => self.apply_remove(entry)?,
            };
            reports.push(report);
        }
        Ok(reports)
    }

    fn apply_add(&mut self, record: AppRecord) -> Result<CandidateReport> {
        let (cover, cover_error) = match self.covers.generate(&record) {
            Ok(asset) => (Some(asset), None),
            Err(err) => {
                warn!("no cover for {}: {}", record.name, err);
                (None, Some(err.to_string()))
            }
        };

        match self.external.add_app(&record, cover.as_ref()) {
            Ok(outcome) => {
                if outcome == AddOutcome::AlreadyExists {
                    info!("{} already present externally, adopting it", record.name);
                }
                self.managed
                    .put(ManagedEntry {
                        id: record.id,
                        name: record.name.clone(),
                        cover_asset_ref: cover.as_ref().map(|c| c.file_path.clone()),
                        added_at: Utc::now(),
                    })
                    .context("Failed to write the managed-state store")?;
                Ok(CandidateReport {
                    id: record.id,
                    name: record.name,
                    outcome: CandidateOutcome::Added { cover_error },
                })
            }
            Err(err) => {
                warn!("add failed for {}: {}", record.name, err);
                Ok(CandidateReport {
                    id: record.id,
                    name: record.name,
                    outcome: CandidateOutcome::Failed(err.to_string()),
                })
            }
        }
    }

    fn apply_remove(&mut self, entry: ManagedEntry) -> Result<CandidateReport> {
        match self.external.remove_app(entry.id) {
            Ok(outcome) => {
                // Both variants drop the local entry; the cover file stays
                // behind as an orphan until an explicit cleanup.
                self.managed
                    .remove(&entry.id)
                    .context("Failed to write the managed-state store")?;
                let outcome = match outcome {
                    RemoveOutcome::Removed => CandidateOutcome::Removed,
                    RemoveOutcome::NotFound => {
                        info!("{} was already gone externally, purging local state", entry.name);
                        CandidateOutcome::ConflictPurged
                    }
                };
                Ok(CandidateReport {
                    id: entry.id,
                    name: entry.name,
                    outcome,
                })
            }
            Err(err) => {
                warn!("remove failed for {}: {}", entry.name, err);
                Ok(CandidateReport {
                    id: entry.id,
                    name: entry.name,
                    outcome: CandidateOutcome::Failed(err.to_string()),
                })
            }
        }
    }

    /// Compares local managed state against the external store's list and
    /// purges entries the external store no longer has.
    pub fn sync_managed(&mut self) -> Result<Vec<CandidateReport>> {
        let external_ids = self
            .external
            .list_apps()
            .context("Failed to list the external store")?;
        let mut purged = Vec::new();
        for entry in self
            .managed
            .list()
            .context("Failed to read the managed-state store")?
        {
            if external_ids.contains(&entry.id) {
                continue;
            }
            info!("{} no longer in the external store, purging", entry.name);
            self.managed
                .remove(&entry.id)
                .context("Failed to write the managed-state store")?;
            purged.push(CandidateReport {
                id: entry.id,
                name: entry.name,
                outcome: CandidateOutcome::ConflictPurged,
            });
        }
        Ok(purged)
    }

    fn managed_ids(&self) -> Result<HashSet<Uuid>> {
        Ok(self
            .managed
            .list()
            .context("Failed to read the managed-state store")?
            .into_iter()
            .map(|e| e.id)
            .collect())
    }
}

fn entry_matches(filters: &Filters, entry: &ManagedEntry) -> bool {
    // Without a cache record only the name is checkable; source and kind
    // filters cannot match.
    if filters.source.is_some() || filters.kind.is_some() {
        return false;
    }
    if filters.managed == Some(false) {
        return false;
    }
    match &filters.search {
        Some(search) => entry
            .name
            .to_lowercase()
            .contains(&search.to_lowercase()),
        None => true,
    }
}
