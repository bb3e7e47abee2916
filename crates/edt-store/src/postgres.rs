//! PostgreSQL implementation over a `sqlx` pool.

use async_trait::async_trait;
use edt_core::{CourseRecord, GroupRef, ModuleRef};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{ScheduleStore, StoreTx};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        info!("schema migrations applied");
        Ok(())
    }

    /// Register department codes; existing codes are left alone. Returns how
    /// many were new.
    pub async fn seed_departments(&self, codes: &[String]) -> Result<u64, StoreError> {
        let mut inserted = 0;
        for code in codes {
            let res = sqlx::query(
                "INSERT INTO departments (code) VALUES ($1) ON CONFLICT (code) DO NOTHING",
            )
            .bind(code)
            .execute(&self.pool)
            .await?;
            inserted += res.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        Ok(PgTx {
            tx: Some(self.pool.begin().await?),
        })
    }
}

pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }

    async fn exec_savepoint(&mut self, verb: &str, name: &str) -> Result<(), StoreError> {
        let name = checked_savepoint(name)?;
        let sql = format!("{verb} {name}");
        let conn = self.conn()?;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&sql)).await?;
        Ok(())
    }
}

fn checked_savepoint(name: &str) -> Result<&str, StoreError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidSavepoint(name.to_string()))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn department_id(&mut self, code: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        sqlx::query_scalar::<_, i64>("SELECT id FROM departments WHERE code = $1")
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::DepartmentNotFound(code.to_string()))
    }

    async fn ensure_week(&mut self, dept: &str, year: i32, week: i32) -> Result<i64, StoreError> {
        let department_id = self.department_id(dept).await?;
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO weeks (department_id, year, week_num)
            VALUES ($1, $2, $3)
            ON CONFLICT (department_id, year, week_num) DO NOTHING
            "#,
        )
        .bind(department_id)
        .bind(year)
        .bind(week)
        .execute(&mut *conn)
        .await?;

        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM weeks WHERE department_id = $1 AND year = $2 AND week_num = $3",
        )
        .bind(department_id)
        .bind(year)
        .bind(week)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn clear_hierarchy(&mut self, dept: &str) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let res = sqlx::query("DELETE FROM group_hierarchy WHERE dept = $1")
            .bind(dept)
            .execute(&mut *conn)
            .await?;
        Ok(res.rows_affected())
    }

    async fn insert_hierarchy_edge(
        &mut self,
        dept: &str,
        parent: &str,
        child: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let res = sqlx::query(
            r#"
            INSERT INTO group_hierarchy (dept, parent_group, child_group)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(dept)
        .bind(parent)
        .bind(child)
        .execute(&mut *conn)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn hierarchy_edges(&mut self, dept: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn()?;
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT parent_group, child_group
              FROM group_hierarchy
             WHERE dept = $1
             ORDER BY parent_group, child_group
            "#,
        )
        .bind(dept)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    async fn count_hierarchy(&mut self, dept: &str) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM group_hierarchy WHERE dept = $1")
                .bind(dept)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn upsert_room(&mut self, dept: &str, name: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        sqlx::query(
            "INSERT INTO rooms (dept, name) VALUES ($1, $2) ON CONFLICT (dept, name) DO NOTHING",
        )
        .bind(dept)
        .bind(name)
        .execute(&mut *conn)
        .await?;
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM rooms WHERE dept = $1 AND name = $2")
            .bind(dept)
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
        Ok(id)
    }

    async fn upsert_module(&mut self, dept: &str, module: &ModuleRef) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO modules (dept, name, abbrev, color_bg, color_txt)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (dept, name, abbrev) DO NOTHING
            "#,
        )
        .bind(dept)
        .bind(&module.name)
        .bind(&module.abbrev)
        .bind(module.color_bg.as_deref())
        .bind(module.color_txt.as_deref())
        .execute(&mut *conn)
        .await?;

        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM modules WHERE dept = $1 AND name = $2 AND abbrev = $3",
        )
        .bind(dept)
        .bind(&module.name)
        .bind(&module.abbrev)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn update_module_colors(
        &mut self,
        module_id: i64,
        module: &ModuleRef,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            UPDATE modules
               SET color_bg = COALESCE($2, color_bg),
                   color_txt = COALESCE($3, color_txt)
             WHERE id = $1
            "#,
        )
        .bind(module_id)
        .bind(module.color_bg.as_deref())
        .bind(module.color_txt.as_deref())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn upsert_tutor(&mut self, dept: &str, username: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        sqlx::query(
            r#"
            INSERT INTO tutors (dept, username) VALUES ($1, $2)
            ON CONFLICT (dept, username) DO NOTHING
            "#,
        )
        .bind(dept)
        .bind(username)
        .execute(&mut *conn)
        .await?;
        let id =
            sqlx::query_scalar::<_, i64>("SELECT id FROM tutors WHERE dept = $1 AND username = $2")
                .bind(dept)
                .bind(username)
                .fetch_one(&mut *conn)
                .await?;
        Ok(id)
    }

    async fn upsert_group(
        &mut self,
        group: &GroupRef,
        is_structural: bool,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO student_groups (name, train_prog, is_structural)
            VALUES ($1, $2, $3)
            ON CONFLICT (name, train_prog) DO UPDATE
               SET is_structural = student_groups.is_structural OR EXCLUDED.is_structural
            RETURNING id
            "#,
        )
        .bind(&group.name)
        .bind(group.train_prog.as_deref().unwrap_or(""))
        .bind(is_structural)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn delete_stale_courses(
        &mut self,
        dept: &str,
        year: i32,
        week: i32,
        keep: &[String],
    ) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let res = sqlx::query(
            r#"
            DELETE FROM scheduled_courses
             WHERE dept = $1
               AND promo_year = $2
               AND week = $3
               AND NOT (external_id = ANY($4))
            "#,
        )
        .bind(dept)
        .bind(year)
        .bind(week)
        .bind(keep)
        .execute(&mut *conn)
        .await?;
        debug!(dept, year, week, deleted = res.rows_affected(), "stale courses removed");
        Ok(res.rows_affected())
    }

    async fn clear_slice(&mut self, dept: &str, year: i32, week: i32) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let res = sqlx::query(
            "DELETE FROM scheduled_courses WHERE dept = $1 AND promo_year = $2 AND week = $3",
        )
        .bind(dept)
        .bind(year)
        .bind(week)
        .execute(&mut *conn)
        .await?;
        Ok(res.rows_affected())
    }

    async fn upsert_course(&mut self, record: &CourseRecord) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO scheduled_courses
                (external_id, dept, week_id, train_prog, program_source, promo_year, week, day,
                 start_time, end_time, course_type, module_id, room_id, tutor_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (external_id) DO UPDATE SET
                dept = EXCLUDED.dept,
                week_id = EXCLUDED.week_id,
                train_prog = EXCLUDED.train_prog,
                program_source = EXCLUDED.program_source,
                promo_year = EXCLUDED.promo_year,
                week = EXCLUDED.week,
                day = EXCLUDED.day,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                course_type = EXCLUDED.course_type,
                module_id = EXCLUDED.module_id,
                room_id = EXCLUDED.room_id,
                tutor_id = EXCLUDED.tutor_id,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(&record.external_id)
        .bind(&record.dept)
        .bind(record.week_id)
        .bind(record.train_prog.as_deref())
        .bind(record.program_source.as_str())
        .bind(record.year)
        .bind(record.week)
        .bind(record.day.as_str())
        .bind(record.start_time)
        .bind(record.end_time)
        .bind(record.course_type.as_deref())
        .bind(record.module_id)
        .bind(record.room_id)
        .bind(record.tutor_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn replace_course_groups(
        &mut self,
        course_id: i64,
        groups: &[String],
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        sqlx::query("DELETE FROM course_groups WHERE course_id = $1")
            .bind(course_id)
            .execute(&mut *conn)
            .await?;
        if groups.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO course_groups (course_id, group_name)
            SELECT $1, g FROM UNNEST($2::text[]) AS g
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(course_id)
        .bind(groups)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.exec_savepoint("SAVEPOINT", name).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.exec_savepoint("ROLLBACK TO SAVEPOINT", name).await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.exec_savepoint("RELEASE SAVEPOINT", name).await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}
