//! Benchmark instance files.
//!
//! An instance file is either a JSON array of instances or JSONL with one
//! instance per line. Blank lines in JSONL are skipped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// One task: a repository checkout and the problem to solve in it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Instance {
    /// Unique identifier. Also used as a directory name under the output dir.
    pub instance_id: String,
    /// Task text handed to the agent as the user message.
    pub problem_statement: String,
    /// Checkout the agent's shell tools run in.
    pub repo_path: PathBuf,
}

/// Load and validate instances from `path`.
///
/// Relative `repo_path` values resolve against the file's directory.
pub fn load_instances(path: &Path) -> Result<Vec<Instance>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut instances = parse_instances(&contents)
        .with_context(|| format!("parse instances {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for instance in &mut instances {
        if instance.repo_path.is_relative() {
            instance.repo_path = base.join(&instance.repo_path);
        }
    }
    validate_instances(&instances)?;
    Ok(instances)
}

pub fn parse_instances(contents: &str) -> Result<Vec<Instance>> {
    if contents.trim_start().starts_with('[') {
        return serde_json::from_str(contents).context("parse JSON array");
    }
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("parse line {}", idx + 1))
        })
        .collect()
}

fn validate_instances(instances: &[Instance]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for instance in instances {
        let id = instance.instance_id.as_str();
        if id.is_empty() {
            bail!("instance_id must not be empty");
        }
        if id == "." || id == ".." || id.contains(['/', '\\']) {
            bail!("instance_id {id:?} is not usable as a directory name");
        }
        if !seen.insert(id) {
            bail!("duplicate instance_id {id:?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_and_jsonl() {
        let array = r#"[
            {"instance_id": "a-1", "problem_statement": "fix a", "repo_path": "/r/a"},
            {"instance_id": "b-2", "problem_statement": "fix b", "repo_path": "/r/b"}
        ]"#;
        let jsonl = concat!(
            r#"{"instance_id": "a-1", "problem_statement": "fix a", "repo_path": "/r/a"}"#,
            "\n\n",
            r#"{"instance_id": "b-2", "problem_statement": "fix b", "repo_path": "/r/b"}"#,
            "\n",
        );
        let from_array = parse_instances(array).expect("array");
        assert_eq!(from_array.len(), 2);
        assert_eq!(from_array, parse_instances(jsonl).expect("jsonl"));
        assert_eq!(from_array[1].problem_statement, "fix b");
    }

    #[test]
    fn jsonl_error_names_the_line() {
        let err = parse_instances("{\"instance_id\": \"x\"}\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 1"), "{err:#}");
    }

    #[test]
    fn relative_repo_paths_resolve_against_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("instances.jsonl");
        fs::write(
            &path,
            r#"{"instance_id": "x", "problem_statement": "p", "repo_path": "repos/x"}"#,
        )
        .expect("write");
        let instances = load_instances(&path).expect("load");
        assert_eq!(instances[0].repo_path, temp.path().join("repos/x"));
    }

    #[test]
    fn rejects_duplicate_and_path_like_ids() {
        let dup = vec![
            Instance {
                instance_id: "x".to_string(),
                problem_statement: String::new(),
                repo_path: PathBuf::from("/r"),
            };
            2
        ];
        assert!(validate_instances(&dup).is_err());

        let nested = [Instance {
            instance_id: "../escape".to_string(),
            problem_statement: String::new(),
            repo_path: PathBuf::from("/r"),
        }];
        assert!(validate_instances(&nested).is_err());
    }
}
