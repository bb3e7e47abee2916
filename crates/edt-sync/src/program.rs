//! Training-program classification of a course.

use edt_core::{CourseItem, ProgramAssignment, ProgramSource};
use tracing::debug;

use crate::hierarchy::GroupDirectory;

/// Walk the fallback chain: the fetch tag, the first group's own
/// `train_prog`, the directory, a name heuristic, then unknown.
pub fn classify_program(
    item: &CourseItem,
    group_names: &[String],
    directory: &GroupDirectory,
    dept_programs: &[String],
) -> ProgramAssignment {
    if let Some(program) = &item.fetched_program {
        return assigned(program, ProgramSource::Fetched);
    }

    if let Some(program) = item.groups.first().and_then(|g| g.train_prog.as_deref()) {
        return assigned(program, ProgramSource::GroupField);
    }

    let Some(first) = group_names.first() else {
        debug!(item = item.label(), "no program and no groups; program unknown");
        return ProgramAssignment::unknown();
    };

    if let Some(program) = directory.program_of(first) {
        return assigned(program, ProgramSource::Directory);
    }

    match infer_program(first, dept_programs) {
        Some(program) => assigned(&program, ProgramSource::Inferred),
        None => {
            debug!(item = item.label(), group = %first, "group name does not identify a program");
            ProgramAssignment::unknown()
        }
    }
}

fn assigned(program: &str, source: ProgramSource) -> ProgramAssignment {
    ProgramAssignment {
        program: Some(program.to_string()),
        source,
    }
}

/// Guess the program from a group name.
///
/// A program code embedded in the name wins (`BUT2-TD1` → `BUT2`). Otherwise
/// a standalone year token (`1`, `2A`, `3B`) selects the program of that
/// year among `dept_programs`.
pub fn infer_program(group_name: &str, dept_programs: &[String]) -> Option<String> {
    let upper = group_name.to_ascii_uppercase();

    if let Some(program) = dept_programs
        .iter()
        .find(|p| !p.is_empty() && upper.contains(&p.to_ascii_uppercase()))
    {
        return Some(program.clone());
    }

    let year = upper
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(year_token)?;

    dept_programs
        .iter()
        .find(|p| p.ends_with(year) && !p[..p.len() - 1].ends_with(|c: char| c.is_ascii_digit()))
        .cloned()
}

/// `1`, `2`, `3`, optionally followed by one letter.
fn year_token(token: &str) -> Option<char> {
    let mut chars = token.chars();
    let digit = chars.next().filter(|c| matches!(c, '1'..='3'))?;
    match (chars.next(), chars.next()) {
        (None, _) => Some(digit),
        (Some(letter), None) if letter.is_ascii_alphabetic() => Some(digit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edt_core::GroupRef;

    fn programs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn item_with(fetched: Option<&str>, groups: Vec<GroupRef>) -> CourseItem {
        CourseItem {
            fetched_program: fetched.map(str::to_string),
            groups,
            ..Default::default()
        }
    }

    #[test]
    fn chain_prefers_the_strongest_source() {
        let but = programs(&["BUT1", "BUT2", "BUT3"]);
        let mut directory = GroupDirectory::default();
        directory.record("BUT3", None, "TP-X");

        let fetched = classify_program(&item_with(Some("BUT1"), vec![]), &[], &directory, &but);
        assert_eq!(fetched.source, ProgramSource::Fetched);

        let with_field = item_with(
            None,
            vec![GroupRef {
                name: "2A".into(),
                train_prog: Some("BUT2".into()),
            }],
        );
        let field = classify_program(&with_field, &["2A".to_string()], &directory, &but);
        assert_eq!(
            (field.program.as_deref(), field.source),
            (Some("BUT2"), ProgramSource::GroupField)
        );

        let bare = item_with(None, vec![]);
        let dir = classify_program(&bare, &["TP-X".to_string()], &directory, &but);
        assert_eq!(
            (dir.program.as_deref(), dir.source),
            (Some("BUT3"), ProgramSource::Directory)
        );

        let inferred = classify_program(&bare, &["2B".to_string()], &directory, &but);
        assert_eq!(
            (inferred.program.as_deref(), inferred.source),
            (Some("BUT2"), ProgramSource::Inferred)
        );

        let unknown = classify_program(&bare, &["Anglais".to_string()], &directory, &but);
        assert_eq!(unknown, ProgramAssignment::unknown());
        assert_eq!(
            classify_program(&bare, &[], &directory, &but),
            ProgramAssignment::unknown()
        );
    }

    #[test]
    fn inference_uses_embedded_codes_then_year_tokens() {
        let cs = programs(&["CS1", "CS2", "CS3"]);
        assert_eq!(infer_program("cs2-td1", &cs).as_deref(), Some("CS2"));
        assert_eq!(infer_program("TD 3A", &cs).as_deref(), Some("CS3"));
        assert_eq!(infer_program("1", &cs).as_deref(), Some("CS1"));
        assert_eq!(infer_program("TD12", &cs), None);
        assert_eq!(infer_program("4A", &cs), None);
        assert_eq!(infer_program("1AB", &cs), None);
    }
}
