use async_trait::async_trait;
use edt_core::{CourseRecord, GroupRef, ModuleRef};

use crate::error::StoreError;

/// A relational store that hands out one transaction per department run.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Writes of one department run. Nothing is visible outside the transaction
/// until [`StoreTx::commit`]; dropping it without committing rolls back.
///
/// Reference-entity upserts are get-or-create on the natural key and return
/// the surrogate id; calling them twice with the same key returns the same id.
#[async_trait]
pub trait StoreTx: Send {
    /// Id of a registered department, or [`StoreError::DepartmentNotFound`].
    async fn department_id(&mut self, code: &str) -> Result<i64, StoreError>;

    async fn ensure_week(&mut self, dept: &str, year: i32, week: i32) -> Result<i64, StoreError>;

    /// Remove every hierarchy edge of `dept`; returns the number removed.
    async fn clear_hierarchy(&mut self, dept: &str) -> Result<u64, StoreError>;

    /// Insert one edge; `false` when it already existed.
    async fn insert_hierarchy_edge(
        &mut self,
        dept: &str,
        parent: &str,
        child: &str,
    ) -> Result<bool, StoreError>;

    /// All `(parent, child)` edges of `dept`, self-edges included.
    async fn hierarchy_edges(&mut self, dept: &str) -> Result<Vec<(String, String)>, StoreError>;

    async fn count_hierarchy(&mut self, dept: &str) -> Result<u64, StoreError>;

    async fn upsert_room(&mut self, dept: &str, name: &str) -> Result<i64, StoreError>;

    /// Colors are written only when the module is created.
    async fn upsert_module(&mut self, dept: &str, module: &ModuleRef) -> Result<i64, StoreError>;

    /// Overwrite the stored colors of an existing module.
    async fn update_module_colors(
        &mut self,
        module_id: i64,
        module: &ModuleRef,
    ) -> Result<(), StoreError>;

    async fn upsert_tutor(&mut self, dept: &str, username: &str) -> Result<i64, StoreError>;

    /// Keyed on `(name, train_prog)`. `is_structural` is promoted, never demoted.
    async fn upsert_group(
        &mut self,
        group: &GroupRef,
        is_structural: bool,
    ) -> Result<i64, StoreError>;

    /// Delete courses of the slice whose external id is not in `keep`.
    async fn delete_stale_courses(
        &mut self,
        dept: &str,
        year: i32,
        week: i32,
        keep: &[String],
    ) -> Result<u64, StoreError>;

    /// Delete every course of the slice.
    async fn clear_slice(&mut self, dept: &str, year: i32, week: i32) -> Result<u64, StoreError>;

    /// Insert, or update every mutable column on `external_id` conflict.
    async fn upsert_course(&mut self, record: &CourseRecord) -> Result<i64, StoreError>;

    /// Replace the group rows of a course with exactly `groups`.
    async fn replace_course_groups(
        &mut self,
        course_id: i64,
        groups: &[String],
    ) -> Result<(), StoreError>;

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;
}
