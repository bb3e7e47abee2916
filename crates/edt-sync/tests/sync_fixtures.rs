use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use edt_core::{Day, IdentityMode, ProgramSource};
use edt_fetch::FixtureSource;
use edt_store::{MemoryState, MemoryStore};
use edt_sync::{
    DepartmentConfig, DepartmentRegistry, DepartmentStatus, SyncOptions, SyncPipeline,
    SyncRunSummary, WeekReport,
};
use serde_json::json;

fn sample_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/flopedt")
}

fn info_registry() -> DepartmentRegistry {
    registry_with(&["BUT1"])
}

fn registry_with(programs: &[&str]) -> DepartmentRegistry {
    DepartmentRegistry {
        departments: vec![DepartmentConfig {
            code: "INFO".into(),
            enabled: true,
            train_progs: programs.iter().map(|p| p.to_string()).collect(),
        }],
    }
}

fn options(clean: bool) -> SyncOptions {
    SyncOptions {
        departments: vec!["INFO".into()],
        year: Some(2025),
        weeks: [10].into_iter().collect(),
        upcoming: None,
        clean,
        identity: IdentityMode::Deterministic,
        refresh_colors: false,
        default_duration: 90,
    }
}

async fn pipeline(root: &Path) -> SyncPipeline<FixtureSource, MemoryStore> {
    SyncPipeline::new(
        Arc::new(FixtureSource::new(root)),
        MemoryStore::with_departments(["INFO"]).await,
        info_registry(),
    )
}

fn week_of(summary: &SyncRunSummary) -> &WeekReport {
    assert_eq!(summary.departments[0].status, DepartmentStatus::Committed);
    &summary.departments[0].weeks[0]
}

/// Temporary fixture tree for INFO/BUT1 with a small structural tree.
struct Scratch {
    dir: tempfile::TempDir,
}

impl Scratch {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let prog = dir.path().join("INFO").join("BUT1");
        std::fs::create_dir_all(&prog).expect("mkdir");
        let tree = json!({
            "id": 1,
            "name": "1",
            "children": [{"id": 2, "name": "1A"}, {"id": 3, "name": "1B"}]
        });
        std::fs::write(prog.join("tree.json"), tree.to_string()).expect("tree");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_week(&self, items: serde_json::Value) {
        self.write_program_week("BUT1", items);
    }

    fn write_program_week(&self, program: &str, items: serde_json::Value) {
        let path = FixtureSource::new(self.path()).scheduled_path("INFO", program, 10, 2025);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).expect("mkdir");
        }
        std::fs::write(path, items.to_string()).expect("scheduled");
    }
}

fn keyed(id: i64, day: &str, start: i64, end: i64, room: &str) -> serde_json::Value {
    json!({
        "id": id,
        "day": day,
        "start_time": start,
        "end_time": end,
        "room": room,
        "course": {"module": {"name": "Algo", "abbrev": "ALG"}, "groups": [{"name": "1"}]}
    })
}

fn ids_by_external(state: &MemoryState) -> BTreeMap<String, i64> {
    state.courses.iter().map(|(ext, c)| (ext.clone(), c.id)).collect()
}

#[tokio::test]
async fn sample_week_lands_with_expanded_groups() {
    let pipeline = pipeline(&sample_root()).await;
    let summary = pipeline.run_once(&options(true)).await;

    assert!(!summary.has_failures());
    assert_eq!(summary.departments[0].hierarchy_edges, 7);
    assert_eq!(
        week_of(&summary),
        &WeekReport {
            year: 2025,
            week: 10,
            fetched: 4,
            duplicates: 0,
            saved: 3,
            skipped: 1,
            failed: 0,
            deleted: 0,
            fetch_errors: 0,
        }
    );

    let state = pipeline.store().snapshot().await;
    let algo = state.course("flopedt-501").expect("course 501");
    assert_eq!(algo.record.day, Day::Tuesday);
    assert_eq!((algo.record.start_time, algo.record.end_time), (540, 630));
    assert_eq!(algo.record.course_type.as_deref(), Some("CM"));
    assert_eq!(algo.record.train_prog.as_deref(), Some("BUT1"));
    assert_eq!(algo.record.program_source, ProgramSource::Fetched);
    assert_eq!(
        algo.record.room_id,
        state.rooms.get(&("INFO".to_string(), "B101".to_string())).copied()
    );
    assert_eq!(
        algo.record.tutor_id,
        state.tutors.get(&("INFO".to_string(), "jdoe".to_string())).copied()
    );
    let module = &state.modules[&("INFO".to_string(), "Algo".to_string(), "ALG".to_string())];
    assert_eq!(algo.record.module_id, Some(module.id));
    assert_eq!(module.color_bg.as_deref(), Some("#ffcc00"));
    assert_eq!(state.groups_of("flopedt-501"), vec!["1A"]);

    let web = state.course("flopedt-502").expect("course 502");
    assert_eq!(
        (web.record.day, web.record.start_time, web.record.end_time),
        (Day::Monday, 480, 570)
    );
    assert_eq!(web.record.course_type.as_deref(), Some("TD"));
    assert_eq!(state.groups_of("flopedt-502"), vec!["1", "1A", "1B"]);

    let generated = state
        .courses_in("INFO", 2025, 10)
        .into_iter()
        .find(|c| c.record.external_id.starts_with("gen-"))
        .expect("generated course");
    assert_eq!(generated.record.day, Day::Wednesday);
    assert_eq!((generated.record.start_time, generated.record.end_time), (600, 660));
    assert_eq!(state.groups_of(&generated.record.external_id), vec!["1A", "ANG-1"]);

    assert!(state.course("flopedt-504").is_none());
    assert_eq!(state.courses_in("INFO", 2025, 10).len(), 3);
}

#[tokio::test]
async fn repeated_runs_leave_identical_rows() {
    let pipeline = pipeline(&sample_root()).await;

    let first = pipeline.run_once(&options(false)).await;
    let before = pipeline.store().snapshot().await;
    let second = pipeline.run_once(&options(false)).await;
    let after = pipeline.store().snapshot().await;

    assert_eq!(week_of(&first).saved, 3);
    assert_eq!(week_of(&second).saved, 3);
    assert_eq!(week_of(&second).deleted, 0);
    assert_eq!(ids_by_external(&before), ids_by_external(&after));
    assert_eq!(before.course_groups, after.course_groups);
    assert_eq!(before.rooms, after.rooms);
    assert_eq!(before.modules, after.modules);
    assert_eq!(before.tutors, after.tutors);
    assert_eq!(before.groups, after.groups);
    assert_eq!(before.hierarchy, after.hierarchy);
}

#[tokio::test]
async fn courses_missing_from_the_fetch_are_deleted() {
    let scratch = Scratch::new();
    let pipeline = pipeline(scratch.path()).await;

    scratch.write_week(json!([
        keyed(1, "mo", 480, 570, "B101"),
        keyed(2, "tu", 480, 570, "B101")
    ]));
    pipeline.run_once(&options(false)).await;
    let removed_id = pipeline
        .store()
        .snapshot()
        .await
        .course("flopedt-2")
        .expect("course 2")
        .id;

    scratch.write_week(json!([keyed(1, "mo", 480, 570, "B101")]));
    let summary = pipeline.run_once(&options(false)).await;

    assert_eq!(week_of(&summary).deleted, 1);
    let state = pipeline.store().snapshot().await;
    assert!(state.course("flopedt-1").is_some());
    assert!(state.course("flopedt-2").is_none());
    assert!(!state.course_groups.contains_key(&removed_id));
}

#[tokio::test]
async fn empty_fetch_leaves_the_slice_untouched() {
    let scratch = Scratch::new();
    let pipeline = pipeline(scratch.path()).await;

    scratch.write_week(json!([keyed(1, "mo", 480, 570, "B101")]));
    pipeline.run_once(&options(true)).await;

    scratch.write_week(json!([]));
    for clean in [false, true] {
        let summary = pipeline.run_once(&options(clean)).await;
        assert_eq!(week_of(&summary).fetched, 0);
        assert_eq!(week_of(&summary).deleted, 0);
    }
    assert!(pipeline.store().snapshot().await.course("flopedt-1").is_some());
}

#[tokio::test]
async fn clean_mode_replaces_the_whole_slice() {
    let scratch = Scratch::new();
    let pipeline = pipeline(scratch.path()).await;

    scratch.write_week(json!([
        keyed(1, "mo", 480, 570, "B101"),
        keyed(2, "tu", 480, 570, "B101")
    ]));
    pipeline.run_once(&options(false)).await;

    scratch.write_week(json!([keyed(1, "mo", 480, 570, "B101")]));
    let summary = pipeline.run_once(&options(true)).await;

    assert_eq!(week_of(&summary).deleted, 2);
    assert_eq!(week_of(&summary).saved, 1);
    let state = pipeline.store().snapshot().await;
    assert_eq!(state.courses_in("INFO", 2025, 10).len(), 1);
    assert_eq!(state.groups_of("flopedt-1"), vec!["1", "1A", "1B"]);
}

#[tokio::test]
async fn course_listed_by_two_programs_keeps_the_first_program() {
    let scratch = Scratch::new();
    let pipeline = SyncPipeline::new(
        Arc::new(FixtureSource::new(scratch.path())),
        MemoryStore::with_departments(["INFO"]).await,
        registry_with(&["BUT1", "BUT2"]),
    );

    let mut shared = keyed(501, "tu", 540, 630, "B101");
    shared["course"]["groups"] = json!([{"name": "2A", "train_prog": "BUT2"}]);
    scratch.write_program_week("BUT1", json!([keyed(501, "tu", 540, 630, "B101")]));
    scratch.write_program_week("BUT2", json!([shared]));

    let summary = pipeline.run_once(&options(false)).await;
    let week = week_of(&summary);
    assert_eq!((week.fetched, week.duplicates, week.saved), (2, 1, 1));

    let state = pipeline.store().snapshot().await;
    assert_eq!(state.courses_in("INFO", 2025, 10).len(), 1);
    let course = state.course("flopedt-501").expect("course 501");
    assert_eq!(course.record.train_prog.as_deref(), Some("BUT1"));
    assert_eq!(state.groups_of("flopedt-501"), vec!["1", "1A", "1B", "2A"]);
}

#[tokio::test]
async fn zero_length_course_is_skipped() {
    let scratch = Scratch::new();
    let pipeline = pipeline(scratch.path()).await;

    scratch.write_week(json!([keyed(9, "tu", 600, 600, "B101")]));
    let summary = pipeline.run_once(&options(false)).await;

    assert_eq!((week_of(&summary).saved, week_of(&summary).skipped), (0, 1));
    assert!(pipeline.store().snapshot().await.courses.is_empty());
}

#[tokio::test]
async fn unkeyed_courses_in_different_rooms_stay_distinct() {
    let scratch = Scratch::new();
    let pipeline = pipeline(scratch.path()).await;

    let mut a = keyed(0, "th", 600, 690, "B101");
    let mut b = keyed(0, "th", 600, 690, "B102");
    a["id"] = serde_json::Value::Null;
    b["id"] = serde_json::Value::Null;
    scratch.write_week(json!([a, b]));

    let summary = pipeline.run_once(&options(false)).await;
    assert_eq!(week_of(&summary).saved, 2);
    let state = pipeline.store().snapshot().await;
    let courses = state.courses_in("INFO", 2025, 10);
    assert_eq!(courses.len(), 2);
    assert!(courses.iter().all(|c| c.record.external_id.starts_with("gen-")));
}

#[tokio::test]
async fn module_colors_change_only_when_refresh_is_requested() {
    let scratch = Scratch::new();
    let pipeline = pipeline(scratch.path()).await;
    let with_color = |color: &str| {
        json!([{
            "id": 1, "day": "mo", "start_time": 480, "end_time": 570,
            "course": {
                "module": {"name": "Algo", "abbrev": "ALG", "display": {"color_bg": color}}
            }
        }])
    };
    let stored_color = |state: &MemoryState| {
        state.modules[&("INFO".to_string(), "Algo".to_string(), "ALG".to_string())]
            .color_bg
            .clone()
    };

    scratch.write_week(with_color("#111111"));
    pipeline.run_once(&options(false)).await;

    scratch.write_week(with_color("#222222"));
    pipeline.run_once(&options(false)).await;
    assert_eq!(stored_color(&pipeline.store().snapshot().await).as_deref(), Some("#111111"));

    let mut refresh = options(false);
    refresh.refresh_colors = true;
    pipeline.run_once(&refresh).await;
    assert_eq!(stored_color(&pipeline.store().snapshot().await).as_deref(), Some("#222222"));
}

#[tokio::test]
async fn disabled_departments_are_reported_and_skipped() {
    let registry = DepartmentRegistry::from_yaml(
        "departments:\n  - code: INFO\n    train_progs: [BUT1]\n  - code: RT\n    enabled: false\n",
        Path::new("inline.yaml"),
    )
    .expect("registry");
    let pipeline = SyncPipeline::new(
        Arc::new(FixtureSource::new(sample_root())),
        MemoryStore::with_departments(["INFO", "RT"]).await,
        registry,
    );
    let mut opts = options(false);
    opts.departments = vec!["RT".into(), "INFO".into()];

    let summary = pipeline.run_once(&opts).await;
    assert!(!summary.has_failures());
    assert_eq!(summary.departments[0].status, DepartmentStatus::Disabled);
    assert!(summary.departments[0].weeks.is_empty());
    assert_eq!(summary.departments[1].status, DepartmentStatus::Committed);
    assert_eq!(summary.totals().saved, 3);
}
