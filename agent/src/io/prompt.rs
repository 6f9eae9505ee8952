//! Context rendering: message headers, the tool catalog and the instructor preamble.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::history::{Message, MessageRenderer};
use crate::core::protocol::RESPONSE_FORMAT;
use crate::core::types::Role;
use crate::tools::ToolSpec;

const TOOL_CATALOG_TEMPLATE: &str = include_str!("prompts/tool_catalog.md");
const DEFAULT_INSTRUCTOR_TEXT: &str = include_str!("prompts/default_instructor.md");

/// Content of the system node.
pub const SYSTEM_PROMPT: &str = "You are a Smart ReAct agent.";

pub const INSTRUCTOR_PREAMBLE: &str = "YOU MUST FOLLOW THE FOLLOWING INSTRUCTIONS AT ANY COST. OTHERWISE, YOU WILL BE DECOMISSIONED.";

/// Built-in instructor text for repository-repair runs.
pub fn default_instructor() -> &'static str {
    DEFAULT_INSTRUCTOR_TEXT.trim_end()
}

/// `----------------------------\n|MESSAGE(role="<role>", id=<id>)|\n`
pub fn message_header(message: &Message) -> String {
    format!(
        "----------------------------\n|MESSAGE(role=\"{}\", id={})|\n",
        message.role, message.id
    )
}

#[derive(Debug, Serialize)]
struct ToolEntryContext<'a> {
    signature: String,
    description: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptTemplates {
    env: Environment<'static>,
}

impl PromptTemplates {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template("tool_catalog", TOOL_CATALOG_TEMPLATE)
            .context("load tool catalog template")?;
        Ok(Self { env })
    }

    /// Tool catalog and response format section appended to the system node.
    pub fn tool_catalog<'a>(&self, specs: impl IntoIterator<Item = &'a ToolSpec>) -> Result<String> {
        let tools: Vec<ToolEntryContext<'_>> = specs
            .into_iter()
            .map(|spec| ToolEntryContext {
                signature: spec.signature(),
                description: &spec.description,
            })
            .collect();
        let template = self.env.get_template("tool_catalog")?;
        let rendered = template
            .render(context! {
                tools => tools,
                response_format => RESPONSE_FORMAT,
            })
            .context("render tool catalog")?;
        Ok(rendered)
    }
}

/// Renders history nodes for one context build.
///
/// The catalog is rendered when the renderer is built, so every step sees the
/// registry as it is at that moment.
pub struct ContextRenderer {
    tool_catalog: String,
}

impl ContextRenderer {
    pub fn new<'a>(
        templates: &PromptTemplates,
        specs: impl IntoIterator<Item = &'a ToolSpec>,
    ) -> Result<Self> {
        Ok(Self {
            tool_catalog: templates.tool_catalog(specs)?,
        })
    }
}

impl MessageRenderer for ContextRenderer {
    fn render(&self, message: &Message) -> String {
        let header = message_header(message);
        match message.role {
            Role::System => format!("{header}{}\n{}", message.content, self.tool_catalog),
            Role::Instructor => format!("{header}{INSTRUCTOR_PREAMBLE}\n{}\n", message.content),
            _ => format!("{header}{}\n", message.content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::History;
    use crate::tools::Param;

    fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new("finish", vec![Param::str("result")], "End the run."),
            ToolSpec::new(
                "show_file_range",
                vec![
                    Param::str("file_path"),
                    Param::int("from_line"),
                    Param::int("to_line"),
                ],
                "Show lines.",
            ),
        ]
    }

    #[test]
    fn catalog_lists_every_tool_then_format() {
        let templates = PromptTemplates::new().expect("templates");
        let catalog = templates.tool_catalog(&specs()).expect("render");
        assert!(catalog.starts_with("--- AVAILABLE TOOLS ---\nFunction: finish(result: str)\nEnd the run.\n\nFunction: show_file_range(file_path: str, from_line: int, to_line: int)\nShow lines.\n\n\n--- RESPONSE FORMAT ---\n"));
        assert!(catalog.contains("----BEGIN_FUNCTION_CALL----"));
        assert!(catalog.ends_with("----END_FUNCTION_CALL----\n\n"));
    }

    #[test]
    fn nodes_render_by_role() {
        let templates = PromptTemplates::new().expect("templates");
        let specs = specs();
        let renderer = ContextRenderer::new(&templates, &specs).expect("renderer");

        let mut history = History::new();
        history.append(Role::System, SYSTEM_PROMPT);
        history.append(Role::User, "fix the bug");
        history.append(Role::Instructor, "be careful");
        let context = history.linearize(&renderer);

        assert!(context.starts_with(
            "----------------------------\n|MESSAGE(role=\"system\", id=0)|\nYou are a Smart ReAct agent.\n--- AVAILABLE TOOLS ---\n"
        ));
        assert!(context.contains(
            "|MESSAGE(role=\"user\", id=1)|\nfix the bug\n----------------------------\n"
        ));
        assert!(context.ends_with(&format!(
            "|MESSAGE(role=\"instructor\", id=2)|\n{INSTRUCTOR_PREAMBLE}\nbe careful\n"
        )));
    }

    #[test]
    fn default_instructor_mentions_workflow_tools() {
        let text = default_instructor();
        assert!(text.starts_with("Output EXACTLY ONE function call per step"));
        assert!(text.contains("stage_and_diff()"));
        assert!(!text.ends_with('\n'));
    }
}
