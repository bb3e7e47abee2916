//! In-process store with the same transactional contract as PostgreSQL.
//!
//! A transaction works on a private copy of the state and publishes it on
//! commit; savepoints are snapshots of that copy. Used by dry runs and tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edt_core::{CourseRecord, GroupRef, ModuleRef};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{ScheduleStore, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredModule {
    pub id: i64,
    pub color_bg: Option<String>,
    pub color_txt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredGroup {
    pub id: i64,
    pub is_structural: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCourse {
    pub id: i64,
    pub record: CourseRecord,
    pub updated_at: DateTime<Utc>,
}

/// Table contents, keyed on each table's natural key.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub departments: BTreeMap<String, i64>,
    /// `(department_id, year, week)` → id
    pub weeks: BTreeMap<(i64, i32, i32), i64>,
    pub rooms: BTreeMap<(String, String), i64>,
    /// `(dept, name, abbrev)`
    pub modules: BTreeMap<(String, String, String), StoredModule>,
    pub tutors: BTreeMap<(String, String), i64>,
    /// `(name, train_prog or "")`
    pub groups: BTreeMap<(String, String), StoredGroup>,
    /// `(dept, parent, child)`
    pub hierarchy: BTreeSet<(String, String, String)>,
    /// Keyed on external id.
    pub courses: BTreeMap<String, StoredCourse>,
    pub course_groups: BTreeMap<i64, BTreeSet<String>>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn course(&self, external_id: &str) -> Option<&StoredCourse> {
        self.courses.get(external_id)
    }

    /// Group names attached to a course, sorted.
    pub fn groups_of(&self, external_id: &str) -> Vec<String> {
        self.course(external_id)
            .and_then(|c| self.course_groups.get(&c.id))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn courses_in(&self, dept: &str, year: i32, week: i32) -> Vec<&StoredCourse> {
        self.courses
            .values()
            .filter(|c| in_slice(&c.record, dept, year, week))
            .collect()
    }

    pub fn edges_of(&self, dept: &str) -> Vec<(String, String)> {
        self.hierarchy
            .iter()
            .filter(|(d, _, _)| d == dept)
            .map(|(_, parent, child)| (parent.clone(), child.clone()))
            .collect()
    }

    fn remove_courses<F>(&mut self, mut doomed: F) -> u64
    where
        F: FnMut(&CourseRecord) -> bool,
    {
        let mut removed = 0;
        let course_groups = &mut self.course_groups;
        self.courses.retain(|_, course| {
            if doomed(&course.record) {
                course_groups.remove(&course.id);
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}

fn in_slice(record: &CourseRecord, dept: &str, year: i32, week: i32) -> bool {
    record.dept == dept && record.year == year && record.week == week
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    rejected_rooms: Arc<Mutex<HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_departments<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.seed_departments(codes).await;
        store
    }

    pub async fn seed_departments<I, S>(&self, codes: I) -> u64
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for code in codes {
            let code = code.into();
            if !state.departments.contains_key(&code) {
                let id = state.next_id();
                state.departments.insert(code, id);
                inserted += 1;
            }
        }
        inserted
    }

    /// Make every later `upsert_room` for `name` fail, to exercise
    /// per-item error handling.
    pub async fn reject_room(&self, name: impl Into<String>) {
        self.rejected_rooms.lock().await.insert(name.into());
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let working = self.state.lock().await.clone();
        let rejected_rooms = self.rejected_rooms.lock().await.clone();
        Ok(MemoryTx {
            target: Arc::clone(&self.state),
            working: Some(working),
            savepoints: Vec::new(),
            rejected_rooms,
        })
    }
}

#[derive(Debug)]
pub struct MemoryTx {
    target: Arc<Mutex<MemoryState>>,
    working: Option<MemoryState>,
    savepoints: Vec<(String, MemoryState)>,
    rejected_rooms: HashSet<String>,
}

impl MemoryTx {
    fn state(&mut self) -> Result<&mut MemoryState, StoreError> {
        self.working.as_mut().ok_or(StoreError::TransactionClosed)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn department_id(&mut self, code: &str) -> Result<i64, StoreError> {
        self.state()?
            .departments
            .get(code)
            .copied()
            .ok_or_else(|| StoreError::DepartmentNotFound(code.to_string()))
    }

    async fn ensure_week(&mut self, dept: &str, year: i32, week: i32) -> Result<i64, StoreError> {
        if !(1..=53).contains(&week) {
            return Err(StoreError::Constraint(format!("week {week} out of range")));
        }
        let department_id = self.department_id(dept).await?;
        let state = self.state()?;
        if let Some(id) = state.weeks.get(&(department_id, year, week)) {
            return Ok(*id);
        }
        let id = state.next_id();
        state.weeks.insert((department_id, year, week), id);
        Ok(id)
    }

    async fn clear_hierarchy(&mut self, dept: &str) -> Result<u64, StoreError> {
        let state = self.state()?;
        let before = state.hierarchy.len();
        state.hierarchy.retain(|(d, _, _)| d != dept);
        Ok((before - state.hierarchy.len()) as u64)
    }

    async fn insert_hierarchy_edge(
        &mut self,
        dept: &str,
        parent: &str,
        child: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state()?
            .hierarchy
            .insert((dept.to_string(), parent.to_string(), child.to_string())))
    }

    async fn hierarchy_edges(&mut self, dept: &str) -> Result<Vec<(String, String)>, StoreError> {
        Ok(self.state()?.edges_of(dept))
    }

    async fn count_hierarchy(&mut self, dept: &str) -> Result<u64, StoreError> {
        Ok(self.state()?.hierarchy.iter().filter(|(d, _, _)| d == dept).count() as u64)
    }

    async fn upsert_room(&mut self, dept: &str, name: &str) -> Result<i64, StoreError> {
        if self.rejected_rooms.contains(name) {
            return Err(StoreError::Constraint(format!("room {name} rejected")));
        }
        let state = self.state()?;
        let key = (dept.to_string(), name.to_string());
        if let Some(id) = state.rooms.get(&key) {
            return Ok(*id);
        }
        let id = state.next_id();
        state.rooms.insert(key, id);
        Ok(id)
    }

    async fn upsert_module(&mut self, dept: &str, module: &ModuleRef) -> Result<i64, StoreError> {
        let state = self.state()?;
        let key = (dept.to_string(), module.name.clone(), module.abbrev.clone());
        if let Some(existing) = state.modules.get(&key) {
            return Ok(existing.id);
        }
        let id = state.next_id();
        state.modules.insert(
            key,
            StoredModule {
                id,
                color_bg: module.color_bg.clone(),
                color_txt: module.color_txt.clone(),
            },
        );
        Ok(id)
    }

    async fn update_module_colors(
        &mut self,
        module_id: i64,
        module: &ModuleRef,
    ) -> Result<(), StoreError> {
        let state = self.state()?;
        if let Some(stored) = state.modules.values_mut().find(|m| m.id == module_id) {
            if module.color_bg.is_some() {
                stored.color_bg = module.color_bg.clone();
            }
            if module.color_txt.is_some() {
                stored.color_txt = module.color_txt.clone();
            }
        }
        Ok(())
    }

    async fn upsert_tutor(&mut self, dept: &str, username: &str) -> Result<i64, StoreError> {
        let state = self.state()?;
        let key = (dept.to_string(), username.to_string());
        if let Some(id) = state.tutors.get(&key) {
            return Ok(*id);
        }
        let id = state.next_id();
        state.tutors.insert(key, id);
        Ok(id)
    }

    async fn upsert_group(
        &mut self,
        group: &GroupRef,
        is_structural: bool,
    ) -> Result<i64, StoreError> {
        let state = self.state()?;
        let key = (group.name.clone(), group.train_prog.clone().unwrap_or_default());
        if let Some(existing) = state.groups.get_mut(&key) {
            existing.is_structural |= is_structural;
            return Ok(existing.id);
        }
        let id = state.next_id();
        state.groups.insert(key, StoredGroup { id, is_structural });
        Ok(id)
    }

    async fn delete_stale_courses(
        &mut self,
        dept: &str,
        year: i32,
        week: i32,
        keep: &[String],
    ) -> Result<u64, StoreError> {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let stale = |r: &CourseRecord| {
            in_slice(r, dept, year, week) && !keep.contains(r.external_id.as_str())
        };
        Ok(self.state()?.remove_courses(stale))
    }

    async fn clear_slice(&mut self, dept: &str, year: i32, week: i32) -> Result<u64, StoreError> {
        Ok(self.state()?.remove_courses(|r| in_slice(r, dept, year, week)))
    }

    async fn upsert_course(&mut self, record: &CourseRecord) -> Result<i64, StoreError> {
        if record.start_time >= record.end_time {
            return Err(StoreError::Constraint(format!(
                "start_time {} must precede end_time {}",
                record.start_time, record.end_time
            )));
        }
        let state = self.state()?;
        if !state.weeks.values().any(|id| *id == record.week_id) {
            return Err(StoreError::Constraint(format!("unknown week id {}", record.week_id)));
        }
        let now = Utc::now();
        if let Some(existing) = state.courses.get_mut(&record.external_id) {
            existing.record = record.clone();
            existing.updated_at = now;
            return Ok(existing.id);
        }
        let id = state.next_id();
        state.courses.insert(
            record.external_id.clone(),
            StoredCourse {
                id,
                record: record.clone(),
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn replace_course_groups(
        &mut self,
        course_id: i64,
        groups: &[String],
    ) -> Result<(), StoreError> {
        let state = self.state()?;
        if !state.courses.values().any(|c| c.id == course_id) {
            return Err(StoreError::Constraint(format!("unknown course id {course_id}")));
        }
        if groups.is_empty() {
            state.course_groups.remove(&course_id);
        } else {
            state
                .course_groups
                .insert(course_id, groups.iter().cloned().collect());
        }
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let snapshot = self.state()?.clone();
        self.savepoints.push((name.to_string(), snapshot));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::UnknownSavepoint(name.to_string()))?;
        // The savepoint itself survives a rollback to it.
        self.savepoints.truncate(pos + 1);
        let snapshot = self.savepoints[pos].1.clone();
        *self.state()? = snapshot;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::UnknownSavepoint(name.to_string()))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let working = self.working.take().ok_or(StoreError::TransactionClosed)?;
        self.savepoints.clear();
        *self.target.lock().await = working;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.working.take().ok_or(StoreError::TransactionClosed)?;
        self.savepoints.clear();
        Ok(())
    }
}
