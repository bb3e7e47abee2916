//! Reconciliation of one (department, week) slice against a fresh fetch.

use std::collections::{BTreeSet, HashMap};

use edt_core::{
    compute_external_id, CourseItem, CourseKey, CourseRecord, GroupRef, IdentityMode, ParseError,
    ProgramAssignment, TimeSlot,
};
use edt_store::{StoreError, StoreTx};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hierarchy::{GroupDirectory, Hierarchy};
use crate::program::classify_program;

/// Everything about the slice that does not change from item to item.
#[derive(Debug, Clone, Copy)]
pub struct WeekContext<'a> {
    pub dept: &'a str,
    pub year: i32,
    pub week: i32,
    pub programs: &'a [String],
    pub directory: &'a GroupDirectory,
    pub hierarchy: &'a Hierarchy,
    pub identity: IdentityMode,
    pub clean: bool,
    pub refresh_colors: bool,
    pub default_duration: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeekReport {
    pub year: i32,
    pub week: i32,
    pub fetched: usize,
    /// Items whose external id was already fetched for another program of
    /// the same week; merged into the first one.
    pub duplicates: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: u64,
    /// Program fetches that failed for this week; deletion is skipped when
    /// non-zero.
    pub fetch_errors: usize,
}

/// A fetched item with everything derived before any write.
#[derive(Debug)]
struct Prepared {
    item: CourseItem,
    slot: Result<TimeSlot, ParseError>,
    groups: Vec<String>,
    program: ProgramAssignment,
    external_id: Option<String>,
}

fn prepare(ctx: &WeekContext<'_>, item: CourseItem) -> Prepared {
    let slot = item.resolve_slot(ctx.default_duration);

    let from_ids = ctx.directory.resolve_ids(&item.group_ids);
    let groups = if from_ids.is_empty() {
        item.group_names()
    } else {
        from_ids
    };

    let program = classify_program(&item, &groups, ctx.directory, ctx.programs);

    let embedded = item.group_names();
    let external_id = match (&item.upstream_id, &slot) {
        (Some(_), _) | (None, Ok(_)) => {
            let slot = slot.as_ref().ok();
            Some(compute_external_id(
                &CourseKey {
                    upstream_id: item.upstream_id.as_deref(),
                    dept: ctx.dept,
                    year: ctx.year,
                    week: ctx.week,
                    program: item.fetched_program.as_deref(),
                    day: slot.map(|s| s.day.as_str()),
                    start: slot.map(|s| s.start),
                    end: slot.map(|s| s.end),
                    room: item.room.as_deref(),
                    module: item.module.as_ref().map(|m| m.name.as_str()),
                    tutor: item.tutor.as_deref(),
                    groups: &embedded,
                },
                ctx.identity,
            ))
        }
        (None, Err(_)) => None,
    };

    Prepared {
        item,
        slot,
        groups,
        program,
        external_id,
    }
}

/// Keep one entry per external id, in fetch order. A course shared by
/// several programs keeps the first program's fields; the groups of later
/// copies are added to it.
fn merge_duplicates(prepared: Vec<Prepared>) -> (Vec<Prepared>, usize) {
    let mut kept: Vec<Prepared> = Vec::with_capacity(prepared.len());
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut merged = 0;

    for entry in prepared {
        let Some(id) = entry.external_id.clone() else {
            kept.push(entry);
            continue;
        };
        match position.get(&id) {
            Some(&at) => {
                let first = &mut kept[at];
                for name in entry.groups {
                    if !first.groups.contains(&name) {
                        first.groups.push(name);
                    }
                }
                debug!(external_id = %id, item = entry.item.label(), "duplicate course merged");
                merged += 1;
            }
            None => {
                position.insert(id, kept.len());
                kept.push(entry);
            }
        }
    }
    (kept, merged)
}

/// Bring the slice in line with `items`.
///
/// `fetch_errors` counts program fetches that failed for this week; with any
/// failure the slice is incomplete and nothing is deleted. Store errors on an
/// individual course are rolled back to that course's savepoint and counted;
/// any other store error is returned.
pub async fn reconcile_week<T: StoreTx>(
    tx: &mut T,
    ctx: &WeekContext<'_>,
    items: Vec<CourseItem>,
    fetch_errors: usize,
) -> Result<WeekReport, StoreError> {
    let mut report = WeekReport {
        year: ctx.year,
        week: ctx.week,
        fetched: items.len(),
        fetch_errors,
        ..Default::default()
    };
    if items.is_empty() {
        debug!(dept = ctx.dept, week = ctx.week, "empty fetch; slice left untouched");
        return Ok(report);
    }

    let week_id = tx.ensure_week(ctx.dept, ctx.year, ctx.week).await?;
    let (prepared, duplicates) =
        merge_duplicates(items.into_iter().map(|item| prepare(ctx, item)).collect());
    report.duplicates = duplicates;

    if fetch_errors > 0 {
        warn!(
            dept = ctx.dept,
            week = ctx.week,
            fetch_errors,
            "partial fetch; stale rows kept"
        );
    } else if ctx.clean {
        report.deleted = tx.clear_slice(ctx.dept, ctx.year, ctx.week).await?;
    } else {
        let keep: Vec<String> = prepared
            .iter()
            .filter_map(|p| p.external_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        report.deleted = tx
            .delete_stale_courses(ctx.dept, ctx.year, ctx.week, &keep)
            .await?;
    }

    for (idx, entry) in prepared.iter().enumerate() {
        let (slot, external_id) = match (&entry.slot, &entry.external_id) {
            (Ok(slot), Some(id)) => (*slot, id.as_str()),
            (Err(err), _) => {
                debug!(item = entry.item.label(), error = %err, "skipping unusable course");
                report.skipped += 1;
                continue;
            }
            (Ok(_), None) => {
                report.skipped += 1;
                continue;
            }
        };

        let savepoint = format!("course_{idx}");
        tx.savepoint(&savepoint).await?;
        match write_course(tx, ctx, week_id, entry, slot, external_id).await {
            Ok(()) => {
                tx.release_savepoint(&savepoint).await?;
                report.saved += 1;
            }
            Err(err) => {
                warn!(
                    dept = ctx.dept,
                    week = ctx.week,
                    item = entry.item.label(),
                    external_id,
                    error = %err,
                    "course write failed; rolled back"
                );
                tx.rollback_to_savepoint(&savepoint).await?;
                tx.release_savepoint(&savepoint).await?;
                report.failed += 1;
            }
        }
    }

    info!(
        dept = ctx.dept,
        week = ctx.week,
        fetched = report.fetched,
        duplicates = report.duplicates,
        saved = report.saved,
        skipped = report.skipped,
        failed = report.failed,
        deleted = report.deleted,
        "week reconciled"
    );
    Ok(report)
}

async fn write_course<T: StoreTx>(
    tx: &mut T,
    ctx: &WeekContext<'_>,
    week_id: i64,
    entry: &Prepared,
    slot: TimeSlot,
    external_id: &str,
) -> Result<(), StoreError> {
    let item = &entry.item;

    let module_id = match &item.module {
        Some(module) => {
            let id = tx.upsert_module(ctx.dept, module).await?;
            if ctx.refresh_colors {
                tx.update_module_colors(id, module).await?;
            }
            Some(id)
        }
        None => None,
    };
    let room_id = match item.room.as_deref() {
        Some(room) => Some(tx.upsert_room(ctx.dept, room).await?),
        None => None,
    };
    let tutor_id = match item.tutor.as_deref() {
        Some(tutor) => Some(tx.upsert_tutor(ctx.dept, tutor).await?),
        None => None,
    };

    for name in &entry.groups {
        tx.upsert_group(&course_group(item, ctx.directory, &entry.program, name), false)
            .await?;
    }

    if entry.program.program.is_none() {
        debug!(item = item.label(), external_id, "storing course without a program");
    }

    let record = CourseRecord {
        external_id: external_id.to_string(),
        dept: ctx.dept.to_string(),
        train_prog: entry.program.program.clone(),
        program_source: entry.program.source,
        year: ctx.year,
        week: ctx.week,
        week_id,
        day: slot.day,
        start_time: slot.start,
        end_time: slot.end,
        course_type: item.course_type.clone(),
        module_id,
        room_id,
        tutor_id,
    };
    let course_id = tx.upsert_course(&record).await?;

    let expanded = ctx.hierarchy.expand(&entry.groups);
    tx.replace_course_groups(course_id, &expanded).await?;
    Ok(())
}

/// The group row a course refers to: its own `train_prog` when upstream sent
/// one, else the program whose tree lists it, else the course's program.
fn course_group(
    item: &CourseItem,
    directory: &GroupDirectory,
    program: &ProgramAssignment,
    name: &str,
) -> GroupRef {
    let train_prog = item
        .groups
        .iter()
        .find(|g| g.name == name)
        .and_then(|g| g.train_prog.clone())
        .or_else(|| directory.program_of(name).map(str::to_string))
        .or_else(|| program.program.clone());
    GroupRef {
        name: name.to_string(),
        train_prog,
    }
}
