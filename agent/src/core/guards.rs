//! Pre-dispatch guards and the change-set check used before termination.
//!
//! Guards are pure: they look at the filtered arguments and the run-scoped
//! [`InspectionLog`], and either let the call through or return the rejection
//! text that the model will see.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Guard configuration (the `[guards]` table of the agent config).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardPolicy {
    /// Actions that modify a resource and are subject to the edit guards.
    pub edit_actions: Vec<String>,
    /// Actions whose successful completion marks the resource as inspected.
    pub inspect_actions: Vec<String>,
    /// Argument naming the resource (file) an action targets.
    pub resource_argument: String,
    pub range_start_argument: String,
    pub range_end_argument: String,
    /// Reject edits to resources that were never inspected in this run.
    pub require_inspection_before_edit: bool,
    /// Largest allowed `end - start` for a single edit.
    pub max_edit_span: i64,
    /// Reject termination until recent tool output shows a relevant change-set.
    pub require_change_before_finish: bool,
    /// How many recent tool messages the change-set check scans.
    pub change_lookback: usize,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            edit_actions: vec!["replace_in_file".to_string()],
            inspect_actions: vec!["show_file".to_string(), "show_file_range".to_string()],
            resource_argument: "file_path".to_string(),
            range_start_argument: "from_line".to_string(),
            range_end_argument: "to_line".to_string(),
            require_inspection_before_edit: true,
            max_edit_span: 120,
            require_change_before_finish: false,
            change_lookback: 10,
        }
    }
}

impl GuardPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.resource_argument.trim().is_empty() {
            return Err(anyhow!("guards.resource_argument must be non-empty"));
        }
        if self.max_edit_span <= 0 {
            return Err(anyhow!("guards.max_edit_span must be > 0"));
        }
        if self.change_lookback == 0 {
            return Err(anyhow!("guards.change_lookback must be > 0"));
        }
        Ok(())
    }

    pub fn is_edit(&self, action: &str) -> bool {
        self.edit_actions.iter().any(|name| name == action)
    }

    pub fn is_inspect(&self, action: &str) -> bool {
        self.inspect_actions.iter().any(|name| name == action)
    }

    /// Resource targeted by the call, if the argument is present and non-empty.
    pub fn resource<'a>(&self, arguments: &'a BTreeMap<String, String>) -> Option<&'a str> {
        arguments
            .get(&self.resource_argument)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Run the edit guards for `action`. `Err` carries the rejection text.
    pub fn check_edit(
        &self,
        action: &str,
        arguments: &BTreeMap<String, String>,
        inspected: &InspectionLog,
    ) -> Result<(), String> {
        if !self.is_edit(action) {
            return Ok(());
        }
        if self.require_inspection_before_edit
            && let Some(resource) = self.resource(arguments)
            && !inspected.contains(resource)
        {
            return Err(format!(
                "Edit blocked: inspect {resource} first with {}.",
                self.inspect_actions.join("/")
            ));
        }
        // Unparseable bounds are left for the tool to report.
        let start = arguments
            .get(&self.range_start_argument)
            .and_then(|v| v.trim().parse::<i64>().ok());
        let end = arguments
            .get(&self.range_end_argument)
            .and_then(|v| v.trim().parse::<i64>().ok());
        if let (Some(start), Some(end)) = (start, end)
            && end
                .checked_sub(start)
                .is_none_or(|span| span > self.max_edit_span)
        {
            return Err(format!(
                "Edit blocked: requested range too large (>{} lines).",
                self.max_edit_span
            ));
        }
        Ok(())
    }
}

/// Resources inspected during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionLog {
    resources: BTreeSet<String>,
}

impl InspectionLog {
    pub fn record(&mut self, resource: &str) {
        let key = normalize(resource);
        if !key.is_empty() {
            self.resources.insert(key);
        }
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains(&normalize(resource))
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(String::as_str)
    }
}

fn normalize(resource: &str) -> String {
    let trimmed = resource.trim();
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}

static DIFF_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:diff --git a/(\S+) b/(\S+)|\+\+\+ (?:b/)?(\S+))").expect("valid regex")
});

/// Whether `output` looks like a unified diff.
pub fn is_change_set(output: &str) -> bool {
    output.contains("diff --git") || output.starts_with("+++ ") || output.starts_with("--- ")
}

/// Paths named by the diff headers in `output`.
pub fn changed_paths(output: &str) -> BTreeSet<String> {
    DIFF_PATH_RE
        .captures_iter(output)
        .flat_map(|caps| {
            [caps.get(1), caps.get(2), caps.get(3)]
                .into_iter()
                .flatten()
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|path| path != "/dev/null")
        .collect()
}

/// Scan recent tool outputs (newest first) for a change-set touching an
/// inspected resource. With nothing inspected, any change-set counts.
pub fn has_relevant_change<'a>(
    recent_outputs: impl IntoIterator<Item = &'a str>,
    inspected: &InspectionLog,
) -> bool {
    for output in recent_outputs {
        if !is_change_set(output) {
            continue;
        }
        if inspected.is_empty() {
            return true;
        }
        let paths = changed_paths(output);
        let relevant = if paths.is_empty() {
            inspected
                .iter()
                .filter_map(basename)
                .any(|base| output.contains(base))
        } else {
            inspected
                .iter()
                .any(|resource| paths.iter().any(|path| same_resource(resource, path)))
        };
        if relevant {
            return true;
        }
    }
    false
}

fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|base| !base.is_empty())
}

/// Paths are compared suffix-wise so `/testbed/pkg/a.py` matches `pkg/a.py`.
fn same_resource(inspected: &str, changed: &str) -> bool {
    let inspected = inspected.trim_start_matches("./");
    let changed = changed.trim_start_matches("./");
    inspected == changed
        || inspected.ends_with(&format!("/{changed}"))
        || changed.ends_with(&format!("/{inspected}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn edit_requires_prior_inspection() {
        let policy = GuardPolicy::default();
        let mut log = InspectionLog::default();
        let call = args(&[("file_path", "src/a.py"), ("from_line", "1"), ("to_line", "3")]);

        let err = policy
            .check_edit("replace_in_file", &call, &log)
            .unwrap_err();
        assert!(err.contains("inspect src/a.py first"));

        log.record("./src/a.py");
        assert!(policy.check_edit("replace_in_file", &call, &log).is_ok());
    }

    #[test]
    fn edit_span_over_limit_is_blocked() {
        let policy = GuardPolicy::default();
        let mut log = InspectionLog::default();
        log.record("a.py");

        let ok = args(&[("file_path", "a.py"), ("from_line", "1"), ("to_line", "121")]);
        assert!(policy.check_edit("replace_in_file", &ok, &log).is_ok());

        let big = args(&[("file_path", "a.py"), ("from_line", "1"), ("to_line", "122")]);
        let err = policy.check_edit("replace_in_file", &big, &log).unwrap_err();
        assert!(err.contains("too large (>120 lines)"));
    }

    #[test]
    fn extreme_bounds_are_blocked_not_wrapped() {
        let policy = GuardPolicy::default();
        let mut log = InspectionLog::default();
        log.record("a.py");

        let min = i64::MIN.to_string();
        let max = i64::MAX.to_string();
        let huge = args(&[("file_path", "a.py"), ("from_line", &min), ("to_line", &max)]);
        let err = policy.check_edit("replace_in_file", &huge, &log).unwrap_err();
        assert!(err.contains("too large"));

        let reversed = args(&[("file_path", "a.py"), ("from_line", &max), ("to_line", &min)]);
        assert!(policy.check_edit("replace_in_file", &reversed, &log).is_err());
    }

    #[test]
    fn non_numeric_bounds_are_left_to_the_tool() {
        let policy = GuardPolicy::default();
        let mut log = InspectionLog::default();
        log.record("a.py");
        let call = args(&[("file_path", "a.py"), ("from_line", "one"), ("to_line", "900")]);
        assert!(policy.check_edit("replace_in_file", &call, &log).is_ok());
    }

    #[test]
    fn non_edit_actions_pass_through() {
        let policy = GuardPolicy::default();
        let call = args(&[("file_path", "never_seen.py")]);
        assert!(
            policy
                .check_edit("show_file", &call, &InspectionLog::default())
                .is_ok()
        );
    }

    #[test]
    fn change_evidence_matches_inspected_paths() {
        let mut log = InspectionLog::default();
        log.record("/testbed/pkg/models.py");
        let diff = "diff --git a/pkg/models.py b/pkg/models.py\n--- a/pkg/models.py\n+++ b/pkg/models.py\n@@ -1 +1 @@\n-a\n+b\n";
        assert!(has_relevant_change([diff], &log));

        let unrelated = "diff --git a/docs/index.rst b/docs/index.rst\n+++ b/docs/index.rst\n";
        assert!(!has_relevant_change([unrelated], &log));
    }

    #[test]
    fn change_evidence_without_inspections_accepts_any_diff() {
        let log = InspectionLog::default();
        assert!(has_relevant_change(["diff --git a/x b/x\n"], &log));
        assert!(!has_relevant_change(["all tests passed"], &log));
    }

    #[test]
    fn changed_paths_skips_dev_null() {
        let diff = "diff --git a/new.py b/new.py\n--- /dev/null\n+++ b/new.py\n";
        let paths = changed_paths(diff);
        assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec!["new.py"]);
    }
}
