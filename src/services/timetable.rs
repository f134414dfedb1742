//! Personal timetable consistency: day grouping, overlap detection and
//! whole-set persistence of a user's selected entries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::error::ServiceError;
use crate::models::entry::{Day, EntryId, EntryKind, ScheduleEntry};
use crate::models::timetable::{Conflict, DataWarning, TimetableView, WarningKind};
use crate::services::catalog::EntryCatalog;
use crate::services::selection_store::SelectionStore;

/// Bucket entries by weekday, each bucket sorted by start time.
///
/// The sort is stable, so entries starting at the same time keep their
/// input order. Entries whose day is not a weekday name are dropped.
pub fn group_by_day(entries: &[ScheduleEntry]) -> BTreeMap<Day, Vec<ScheduleEntry>> {
    let mut grouped: BTreeMap<Day, Vec<ScheduleEntry>> = BTreeMap::new();

    for entry in entries {
        match entry.parsed_day() {
            Some(day) => grouped.entry(day).or_default().push(entry.clone()),
            None => warn!(
                "Dropping entry {} from weekly view: unrecognized day '{}'",
                entry.id, entry.day
            ),
        }
    }

    for bucket in grouped.values_mut() {
        bucket.sort_by_key(|entry| entry.start_time);
    }

    grouped
}

// Half-open interval overlap on the same day
fn overlaps(a: &ScheduleEntry, b: &ScheduleEntry) -> bool {
    a.start_time < b.end_time && b.start_time < a.end_time
}

/// Every same-day pair of entries whose `[start, end)` ranges intersect.
///
/// Entries with an empty or inverted time range are ignored. Each bucket is
/// compared pairwise, which is quadratic per day; schedules are small enough
/// that an interval tree would not pay off.
///
/// Output is ordered by day, then the earlier start time of the pair, then
/// entry ids.
pub fn find_conflicts(entries: &[ScheduleEntry]) -> Vec<Conflict> {
    let valid: Vec<ScheduleEntry> = entries
        .iter()
        .filter(|entry| entry.has_valid_time_range())
        .cloned()
        .collect();

    let mut found = Vec::new();

    for (day, bucket) in group_by_day(&valid) {
        for (i, a) in bucket.iter().enumerate() {
            for b in bucket.iter().skip(i + 1) {
                if a.id == b.id || !overlaps(a, b) {
                    continue;
                }

                // Earlier start first, ties broken by id
                let (first, second) = if (a.start_time, &a.id) <= (b.start_time, &b.id) {
                    (a, b)
                } else {
                    (b, a)
                };

                found.push((
                    day,
                    first.start_time,
                    Conflict {
                        day,
                        first_entry_id: first.id.clone(),
                        second_entry_id: second.id.clone(),
                        message: format!("Overlapping classes: {} and {}", first.label, second.label),
                    },
                ));
            }
        }
    }

    found.sort_by(|(day_a, start_a, a), (day_b, start_b, b)| {
        (day_a, start_a, &a.first_entry_id, &a.second_entry_id)
            .cmp(&(day_b, start_b, &b.first_entry_id, &b.second_entry_id))
    });

    found.into_iter().map(|(_, _, conflict)| conflict).collect()
}

/// Non-fatal problems in catalog records, in input order.
pub fn data_warnings(entries: &[ScheduleEntry]) -> Vec<DataWarning> {
    let mut warnings = Vec::new();

    for entry in entries {
        if entry.parsed_day().is_none() {
            warnings.push(DataWarning {
                entry_id: entry.id.clone(),
                kind: WarningKind::UnknownDay,
                message: format!("Entry {} has unrecognized day '{}'", entry.id, entry.day),
            });
        }

        if !entry.has_valid_time_range() {
            warnings.push(DataWarning {
                entry_id: entry.id.clone(),
                kind: WarningKind::InvalidTimeRange,
                message: format!(
                    "Entry {} ends at {} which is not after its start {}",
                    entry.id,
                    entry.end_time.format("%H:%M"),
                    entry.start_time.format("%H:%M")
                ),
            });
        }
    }

    warnings
}

/// Assemble the weekly view, conflicts and warnings for resolved entries.
pub fn build_view(mut entries: Vec<ScheduleEntry>) -> TimetableView {
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries.dedup_by(|a, b| a.id == b.id);

    let data_warnings = data_warnings(&entries);
    for warning in &data_warnings {
        warn!("Catalog data warning: {}", warning.message);
    }

    TimetableView {
        weekly: group_by_day(&entries),
        conflicts: find_conflicts(&entries),
        data_warnings,
        entries,
    }
}

/// Stateless engine over the catalog and selection store collaborators.
pub struct TimetableEngine {
    catalog: Arc<dyn EntryCatalog>,
    store: Arc<dyn SelectionStore>,
    call_timeout: Duration,
}

impl TimetableEngine {
    pub fn new(
        catalog: Arc<dyn EntryCatalog>,
        store: Arc<dyn SelectionStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            call_timeout,
        }
    }

    // Bound a collaborator call; an elapsed timeout becomes DependencyUnavailable
    async fn bounded<T>(
        &self,
        dependency: &str,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::dependency(
                dependency,
                format!("timed out after {} ms", self.call_timeout.as_millis()),
            )),
        }
    }

    pub async fn list_catalog(&self, session: &Session) -> Result<Vec<ScheduleEntry>, ServiceError> {
        self.bounded("catalog", self.catalog.list_entries(session)).await
    }

    /// Load the stored selection resolved against the current catalog.
    ///
    /// Stored ids missing from the catalog, or no longer pointing at a class,
    /// are skipped, not reported.
    pub async fn load_timetable(&self, session: &Session) -> Result<TimetableView, ServiceError> {
        let (catalog, selection) = futures::try_join!(
            self.list_catalog(session),
            self.bounded("selection store", self.store.get_selection(&session.user_id)),
        )?;

        let by_id: HashMap<&str, &ScheduleEntry> =
            catalog.iter().map(|entry| (entry.id.as_str(), entry)).collect();

        let mut resolved = Vec::with_capacity(selection.len());
        for id in &selection {
            match by_id.get(id.as_str()) {
                Some(entry) if entry.kind == EntryKind::Class => resolved.push((*entry).clone()),
                Some(entry) => debug!(
                    "Selection of user {} references {:?} entry {}, skipping",
                    session.user_id, entry.kind, id
                ),
                None => debug!(
                    "Selection of user {} references missing entry {}, skipping",
                    session.user_id, id
                ),
            }
        }

        let view = build_view(resolved);
        info!(
            "Loaded timetable for user {}: {} entries, {} conflicts",
            session.user_id,
            view.entries.len(),
            view.conflicts.len()
        );
        Ok(view)
    }

    /// Replace the stored selection with `ids`.
    ///
    /// Unknown ids and non-class entries reject the whole save before
    /// anything is written.
    /// Conflicts are reported in the returned view but never block saving.
    pub async fn save_timetable(
        &self,
        session: &Session,
        ids: BTreeSet<EntryId>,
    ) -> Result<TimetableView, ServiceError> {
        let catalog = self.list_catalog(session).await?;

        let by_id: HashMap<&str, &ScheduleEntry> =
            catalog.iter().map(|entry| (entry.id.as_str(), entry)).collect();

        let unknown: Vec<EntryId> = ids
            .iter()
            .filter(|id| !by_id.contains_key(id.as_str()))
            .cloned()
            .collect();

        if !unknown.is_empty() {
            warn!(
                "Rejecting timetable save for user {}: unknown entries {:?}",
                session.user_id, unknown
            );
            return Err(ServiceError::UnknownEntries { ids: unknown });
        }

        // Meal and gym slots are visible but not selectable
        let not_classes: Vec<EntryId> = ids
            .iter()
            .filter(|id| {
                by_id
                    .get(id.as_str())
                    .is_some_and(|entry| entry.kind != EntryKind::Class)
            })
            .cloned()
            .collect();

        if !not_classes.is_empty() {
            warn!(
                "Rejecting timetable save for user {}: non-class entries {:?}",
                session.user_id, not_classes
            );
            return Err(ServiceError::Validation(format!(
                "only class entries can be selected: {}",
                not_classes.join(", ")
            )));
        }

        let resolved: Vec<ScheduleEntry> = ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|entry| (*entry).clone()))
            .collect();

        self.bounded("selection store", self.store.set_selection(&session.user_id, ids))
            .await?;

        let view = build_view(resolved);
        info!(
            "Saved timetable for user {}: {} entries, {} conflicts",
            session.user_id,
            view.entries.len(),
            view.conflicts.len()
        );
        Ok(view)
    }
}
