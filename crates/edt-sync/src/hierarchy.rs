//! Group hierarchy of a department: edge table construction from the
//! upstream trees, and transitive expansion of course groups.

use std::collections::{BTreeSet, HashMap, HashSet};

use edt_core::{GroupNode, GroupRef};
use edt_fetch::ScheduleSource;
use edt_store::{StoreError, StoreTx};
use tracing::{debug, info, warn};

/// Group names known from the trees, by upstream id and by program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDirectory {
    names_by_id: HashMap<i64, String>,
    /// In registry order, so lookups prefer the first program listed.
    by_program: Vec<(String, BTreeSet<String>)>,
}

impl GroupDirectory {
    pub fn record(&mut self, program: &str, id: Option<i64>, name: &str) {
        if let Some(id) = id {
            self.names_by_id.insert(id, name.to_string());
        }
        match self.by_program.iter_mut().find(|(p, _)| p == program) {
            Some((_, names)) => {
                names.insert(name.to_string());
            }
            None => self
                .by_program
                .push((program.to_string(), BTreeSet::from([name.to_string()]))),
        }
    }

    pub fn name_of(&self, id: i64) -> Option<&str> {
        self.names_by_id.get(&id).map(String::as_str)
    }

    /// First program whose trees list `name`.
    pub fn program_of(&self, name: &str) -> Option<&str> {
        self.by_program
            .iter()
            .find(|(_, names)| names.contains(name))
            .map(|(program, _)| program.as_str())
    }

    /// Names of the known ids, de-duplicated, in input order.
    pub fn resolve_ids(&self, ids: &[i64]) -> Vec<String> {
        let mut seen = HashSet::new();
        ids.iter()
            .filter_map(|id| self.name_of(*id))
            .filter(|name| seen.insert(*name))
            .map(str::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_program.iter().map(|(_, names)| names.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct HierarchyOutcome {
    pub edges: u64,
    pub directory: GroupDirectory,
    /// Programs whose tree or transversal listing could not be fetched.
    pub failed_fetches: usize,
}

/// Rebuild the hierarchy edges of `dept` from the upstream group trees.
///
/// Fetch failures are logged and skip that listing; store failures abort
/// the build.
pub async fn build_hierarchy<S, T>(
    tx: &mut T,
    source: &S,
    dept: &str,
    programs: &[String],
) -> Result<HierarchyOutcome, StoreError>
where
    S: ScheduleSource + ?Sized,
    T: StoreTx,
{
    let cleared = tx.clear_hierarchy(dept).await?;
    debug!(dept, cleared, "hierarchy cleared");

    let mut outcome = HierarchyOutcome::default();

    for program in programs {
        match source.fetch_group_tree(dept, program).await {
            Ok(roots) => insert_tree(tx, dept, program, &roots, &mut outcome.directory).await?,
            Err(err) => {
                warn!(
                    dept,
                    program = %program,
                    error = %err,
                    "structural tree fetch failed; skipping"
                );
                outcome.failed_fetches += 1;
            }
        }

        match source.fetch_transversal_groups(dept, program).await {
            Ok(groups) => {
                for group in &groups {
                    let Some(name) = group.name() else { continue };
                    tx.upsert_group(&group_ref(name, program), false).await?;
                    outcome.directory.record(program, group.id, name);
                    tx.insert_hierarchy_edge(dept, name, name).await?;
                    for conflict in group.conflict_names() {
                        tx.insert_hierarchy_edge(dept, name, &conflict).await?;
                    }
                }
            }
            Err(err) => {
                warn!(
                    dept,
                    program = %program,
                    error = %err,
                    "transversal groups fetch failed; skipping"
                );
                outcome.failed_fetches += 1;
            }
        }
    }

    outcome.edges = tx.count_hierarchy(dept).await?;
    info!(
        dept,
        edges = outcome.edges,
        groups = outcome.directory.len(),
        "group hierarchy built"
    );
    Ok(outcome)
}

/// Depth-first walk inserting a self edge per node and a parent edge per
/// child. A name already walked in this tree is linked but not descended
/// into again.
async fn insert_tree<T: StoreTx>(
    tx: &mut T,
    dept: &str,
    program: &str,
    roots: &[GroupNode],
    directory: &mut GroupDirectory,
) -> Result<(), StoreError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<(&GroupNode, Option<String>)> =
        roots.iter().rev().map(|n| (n, None)).collect();

    while let Some((node, parent)) = stack.pop() {
        let Some(name) = node.name() else { continue };

        if let Some(parent) = parent.as_deref().filter(|p| *p != name) {
            tx.insert_hierarchy_edge(dept, parent, name).await?;
        }
        if !visited.insert(name.to_string()) {
            continue;
        }

        tx.upsert_group(&group_ref(name, program), true).await?;
        directory.record(program, node.id, name);
        tx.insert_hierarchy_edge(dept, name, name).await?;

        for child in node.children().iter().rev() {
            stack.push((child, Some(name.to_string())));
        }
    }
    Ok(())
}

fn group_ref(name: &str, program: &str) -> GroupRef {
    GroupRef {
        name: name.to_string(),
        train_prog: Some(program.to_string()),
    }
}

/// Parent → children adjacency, self edges excluded.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    children: HashMap<String, Vec<String>>,
}

impl Hierarchy {
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for (parent, child) in edges {
            if parent != child {
                children.entry(parent).or_default().push(child);
            }
        }
        Self { children }
    }

    /// `direct` plus every group reachable from them, sorted.
    pub fn expand(&self, direct: &[String]) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut stack: Vec<&str> = direct.iter().map(String::as_str).collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            if let Some(kids) = self.children.get(name) {
                stack.extend(kids.iter().map(String::as_str));
            }
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use edt_core::{CourseItem, TransversalGroup, TutorProfile};
    use edt_fetch::FetchError;
    use edt_store::{MemoryStore, ScheduleStore};
    use serde_json::json;

    struct Trees;

    #[async_trait]
    impl ScheduleSource for Trees {
        fn source_id(&self) -> &str {
            "trees"
        }

        async fn fetch_scheduled(
            &self,
            _: &str,
            _: &str,
            _: i32,
            _: i32,
        ) -> Result<Vec<CourseItem>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_group_tree(
            &self,
            _dept: &str,
            program: &str,
        ) -> Result<Vec<GroupNode>, FetchError> {
            match program {
                "BUT1" => Ok(vec![serde_json::from_value(json!({
                    "id": 1, "name": "1",
                    "children": [
                        {"id": 2, "name": "1A", "children": [{"id": 4, "name": "1A1"}]},
                        {"id": 3, "name": "1B", "children": []}
                    ]
                }))
                .expect("tree")]),
                // "3" reappears under its own child.
                "BUT3" => Ok(vec![serde_json::from_value(json!({
                    "id": 30, "name": "3",
                    "children": [{"id": 31, "name": "3A", "children": [
                        {"id": 30, "name": "3", "children": [{"id": 32, "name": "3B"}]}
                    ]}]
                }))
                .expect("tree")]),
                _ => Err(FetchError::HttpStatus {
                    status: 500,
                    url: "tree".into(),
                    body: String::new(),
                }),
            }
        }

        async fn fetch_transversal_groups(
            &self,
            _: &str,
            program: &str,
        ) -> Result<Vec<TransversalGroup>, FetchError> {
            if program != "BUT1" {
                return Ok(Vec::new());
            }
            Ok(vec![serde_json::from_value(json!({
                "id": 9, "name": "OPT", "conflicting_groups": [{"name": "1B"}]
            }))
            .expect("transversal")])
        }

        async fn fetch_tutors(&self, _: &str) -> Result<Vec<TutorProfile>, FetchError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn builds_self_containment_and_conflict_edges() {
        let store = MemoryStore::with_departments(["INFO"]).await;
        let mut tx = store.begin().await.expect("begin");
        tx.insert_hierarchy_edge("INFO", "stale", "edge").await.expect("seed");

        let programs = vec!["BUT1".to_string(), "BUT2".to_string()];
        let outcome = build_hierarchy(&mut tx, &Trees, "INFO", &programs).await.expect("build");
        tx.commit().await.expect("commit");

        // self: 1, 1A, 1A1, 1B, OPT; containment: 1→1A, 1→1B, 1A→1A1; conflict: OPT→1B
        assert_eq!(outcome.edges, 9);
        assert_eq!(outcome.failed_fetches, 1);
        assert_eq!(outcome.directory.name_of(2), Some("1A"));
        assert_eq!(outcome.directory.program_of("OPT"), Some("BUT1"));

        let state = store.snapshot().await;
        let edges = state.edges_of("INFO");
        assert!(edges.contains(&("1".to_string(), "1A".to_string())));
        assert!(edges.contains(&("OPT".to_string(), "1B".to_string())));
        assert!(!edges.contains(&("stale".to_string(), "edge".to_string())));
        assert!(state.groups[&("1A".to_string(), "BUT1".to_string())].is_structural);
        assert!(!state.groups[&("OPT".to_string(), "BUT1".to_string())].is_structural);
    }

    #[tokio::test]
    async fn repeated_name_in_a_tree_is_linked_once_and_not_walked_again() {
        let store = MemoryStore::with_departments(["INFO"]).await;
        let mut tx = store.begin().await.expect("begin");

        let programs = vec!["BUT3".to_string()];
        let outcome = build_hierarchy(&mut tx, &Trees, "INFO", &programs).await.expect("build");
        tx.commit().await.expect("commit");

        // self: 3, 3A; containment: 3→3A, 3A→3
        assert_eq!(outcome.edges, 4);
        assert_eq!(outcome.failed_fetches, 0);
        let edges = store.snapshot().await.edges_of("INFO");
        assert!(edges.contains(&("3A".to_string(), "3".to_string())));
        assert!(!edges.iter().any(|(_, child)| child == "3B"));

        let hierarchy = Hierarchy::from_edges(edges);
        assert_eq!(hierarchy.expand(&["3A".to_string()]), vec!["3", "3A"]);
    }

    #[test]
    fn expansion_is_transitive_and_cycle_safe() {
        let hierarchy = Hierarchy::from_edges(vec![
            ("1".to_string(), "1".to_string()),
            ("1".to_string(), "1A".to_string()),
            ("1".to_string(), "1B".to_string()),
            ("1A".to_string(), "1A1".to_string()),
            ("1A1".to_string(), "1".to_string()),
        ]);
        assert_eq!(hierarchy.expand(&["1".to_string()]), vec!["1", "1A", "1A1", "1B"]);
        assert_eq!(hierarchy.expand(&["1B".to_string()]), vec!["1B"]);
        assert_eq!(hierarchy.expand(&["X".to_string()]), vec!["X"]);
        assert!(hierarchy.expand(&[]).is_empty());
    }

    #[test]
    fn directory_resolves_ids_in_order_without_duplicates() {
        let mut directory = GroupDirectory::default();
        directory.record("BUT1", Some(1), "1A");
        directory.record("BUT2", Some(2), "2A");
        directory.record("BUT2", Some(3), "1A");
        assert_eq!(directory.resolve_ids(&[2, 99, 1, 3]), vec!["2A", "1A"]);
        assert_eq!(directory.program_of("1A"), Some("BUT1"));
        assert_eq!(directory.len(), 3);
    }
}
