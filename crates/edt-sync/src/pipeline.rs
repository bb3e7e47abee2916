//! Run coordination: one transaction per department, departments in
//! sequence, a summary of every slice touched.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use edt_core::CourseItem;
use edt_fetch::ScheduleSource;
use edt_store::{ScheduleStore, StoreError, StoreTx};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{DepartmentRegistry, SyncConfig, SyncOptions};
use crate::hierarchy::{build_hierarchy, Hierarchy};
use crate::reconcile::{reconcile_week, WeekContext, WeekReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentStatus {
    Committed,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentReport {
    pub dept: String,
    pub status: DepartmentStatus,
    pub error: Option<String>,
    pub programs: Vec<String>,
    pub hierarchy_edges: u64,
    pub weeks: Vec<WeekReport>,
}

impl DepartmentReport {
    fn new(dept: &str, status: DepartmentStatus) -> Self {
        Self {
            dept: dept.to_string(),
            status,
            error: None,
            programs: Vec::new(),
            hierarchy_edges: 0,
            weeks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTotals {
    pub fetched: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Year of the first synced slice.
    pub year: i32,
    pub departments: Vec<DepartmentReport>,
}

impl SyncRunSummary {
    pub fn has_failures(&self) -> bool {
        self.departments
            .iter()
            .any(|d| d.status == DepartmentStatus::Failed)
    }

    pub fn failed_departments(&self) -> Vec<&str> {
        self.departments
            .iter()
            .filter(|d| d.status == DepartmentStatus::Failed)
            .map(|d| d.dept.as_str())
            .collect()
    }

    pub fn totals(&self) -> SyncTotals {
        self.departments
            .iter()
            .flat_map(|d| &d.weeks)
            .fold(SyncTotals::default(), |mut acc, w| {
                acc.fetched += w.fetched;
                acc.saved += w.saved;
                acc.skipped += w.skipped;
                acc.failed += w.failed;
                acc.deleted += w.deleted;
                acc
            })
    }
}

pub struct SyncPipeline<S, St> {
    source: Arc<S>,
    store: St,
    registry: DepartmentRegistry,
}

impl<S, St> SyncPipeline<S, St>
where
    S: ScheduleSource + 'static,
    St: ScheduleStore + 'static,
{
    pub fn new(source: Arc<S>, store: St, registry: DepartmentRegistry) -> Self {
        Self {
            source,
            store,
            registry,
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// Sync every selected department. Department failures are recorded in
    /// the summary, never returned.
    pub async fn run_once(&self, options: &SyncOptions) -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let slices = options.slices();
        let year = slices
            .first()
            .map(|&(year, _)| year)
            .unwrap_or_else(|| options.resolved_year());
        info!(
            %run_id,
            source = self.source.source_id(),
            year,
            departments = ?options.departments,
            weeks = slices.len(),
            upcoming = ?options.upcoming,
            "sync run started"
        );

        let mut departments = Vec::with_capacity(options.departments.len());
        for dept in &options.departments {
            if !self.registry.is_enabled(dept) {
                info!(dept = %dept, "department disabled in registry; skipping");
                departments.push(DepartmentReport::new(dept, DepartmentStatus::Disabled));
                continue;
            }

            let span = info_span!("sync_department", dept = %dept, year);
            let report = self
                .sync_department(dept, &slices, options)
                .instrument(span)
                .await;
            departments.push(report);
        }

        let summary = SyncRunSummary {
            run_id,
            source_id: self.source.source_id().to_string(),
            started_at,
            finished_at: Utc::now(),
            year,
            departments,
        };
        let totals = summary.totals();
        info!(
            %run_id,
            saved = totals.saved,
            deleted = totals.deleted,
            failed_departments = summary.failed_departments().len(),
            "sync run finished"
        );
        summary
    }

    async fn sync_department(
        &self,
        dept: &str,
        slices: &[(i32, i32)],
        options: &SyncOptions,
    ) -> DepartmentReport {
        let mut report = DepartmentReport::new(dept, DepartmentStatus::Failed);
        report.programs = self.registry.programs_for(dept);

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                error!(error = %err, "could not open department transaction");
                report.error = Some(err.to_string());
                return report;
            }
        };

        let outcome = self
            .sync_in_tx(&mut tx, dept, slices, options, &mut report)
            .await;
        let outcome = match outcome {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        };

        match outcome {
            Ok(()) => {
                report.status = DepartmentStatus::Committed;
                info!(weeks = report.weeks.len(), "department committed");
            }
            Err(err) => {
                error!(error = %err, "department sync failed; rolled back");
                report.error = Some(err.to_string());
            }
        }
        report
    }

    async fn sync_in_tx(
        &self,
        tx: &mut St::Tx,
        dept: &str,
        slices: &[(i32, i32)],
        options: &SyncOptions,
        report: &mut DepartmentReport,
    ) -> Result<(), StoreError> {
        tx.department_id(dept).await?;
        let programs = report.programs.clone();

        let outcome = build_hierarchy(tx, self.source.as_ref(), dept, &programs).await?;
        report.hierarchy_edges = outcome.edges;
        let hierarchy = Hierarchy::from_edges(tx.hierarchy_edges(dept).await?);

        for &(year, week) in slices {
            let (items, fetch_errors) = self.fetch_week(dept, &programs, week, year).await;
            let ctx = WeekContext {
                dept,
                year,
                week,
                programs: &programs,
                directory: &outcome.directory,
                hierarchy: &hierarchy,
                identity: options.identity,
                clean: options.clean,
                refresh_colors: options.refresh_colors,
                default_duration: options.default_duration,
            };
            let week_report = reconcile_week(tx, &ctx, items, fetch_errors).await?;
            report.weeks.push(week_report);
        }
        Ok(())
    }

    /// Items of every program for one week, and how many program fetches failed.
    async fn fetch_week(
        &self,
        dept: &str,
        programs: &[String],
        week: i32,
        year: i32,
    ) -> (Vec<CourseItem>, usize) {
        let mut items = Vec::new();
        let mut failures = 0;
        for program in programs {
            match self.source.fetch_scheduled(dept, program, week, year).await {
                Ok(batch) => items.extend(batch),
                Err(err) => {
                    warn!(
                        program = %program,
                        year,
                        week,
                        error = %err,
                        "scheduled courses fetch failed; no data for this program"
                    );
                    failures += 1;
                }
            }
        }
        (items, failures)
    }
}

/// Build the cron scheduler when `EDT_SCHEDULER_ENABLED` is set.
///
/// A trigger that fires while the previous run is still going is skipped.
pub async fn maybe_build_scheduler<S, St>(
    pipeline: Arc<SyncPipeline<S, St>>,
    config: &SyncConfig,
    options: SyncOptions,
) -> Result<Option<JobScheduler>>
where
    S: ScheduleSource + 'static,
    St: ScheduleStore + 'static,
{
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let running = Arc::new(Mutex::new(()));
    let cron = config.sync_cron.clone();

    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        let running = Arc::clone(&running);
        let options = options.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                warn!("previous sync still running; skipping this trigger");
                return;
            };
            let summary = pipeline.run_once(&options).await;
            if summary.has_failures() {
                warn!(
                    run_id = %summary.run_id,
                    failed = ?summary.failed_departments(),
                    "scheduled sync had failures"
                );
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
