use std::sync::Arc;
use std::time::Duration;

use react_agent::agent::{FINISH_BLOCKED, ReactAgent, RunError, assemble};
use react_agent::core::guards::GuardPolicy;
use react_agent::core::invariants::validate_invariants;
use react_agent::core::types::Role;
use react_agent::io::config::AgentConfig;
use react_agent::io::sandbox::{LocalShell, Sandbox};
use react_agent::test_support::{ScriptedModel, ScriptedSandbox, call, ok};

fn tool_messages(agent: &ReactAgent) -> Vec<String> {
    agent
        .history()
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
        .collect()
}

fn file_tools_config() -> AgentConfig {
    let mut cfg = AgentConfig::default();
    cfg.tools.optional = true;
    cfg
}

#[test]
fn finish_on_first_turn_uses_one_model_call() {
    let model = ScriptedModel::new([call("finish", &[("result", "done")])]);
    let mut agent =
        ReactAgent::new("t", Box::new(model.clone()), GuardPolicy::default()).expect("agent");

    let result = agent.run("say done", 3).expect("run");

    assert_eq!(result, "done");
    assert_eq!(model.calls(), 1);
    let last = agent.history().messages().last().expect("last");
    assert_eq!(last.role, Role::Tool);
    assert_eq!(last.content, "done");
}

#[test]
fn unparseable_output_is_recorded_until_budget_runs_out() {
    let model = ScriptedModel::repeating("I think I should look around first.");
    let mut agent =
        ReactAgent::new("t", Box::new(model.clone()), GuardPolicy::default()).expect("agent");

    let err = agent.run("task", 3).unwrap_err();

    assert!(matches!(err, RunError::StepLimit { steps: 3 }));
    assert_eq!(model.calls(), 3);
    assert_eq!(agent.history().len(), 3 + 3 * 2);
    let tools = tool_messages(&agent);
    assert_eq!(tools.len(), 3);
    for content in tools {
        assert_eq!(
            content,
            "Error parsing model output: missing END_FUNCTION_CALL delimiter"
        );
    }
    assert!(validate_invariants(agent.history()).is_empty());
}

#[test]
fn unknown_function_is_reported_to_the_model() {
    let model = ScriptedModel::new([
        call("teleport", &[("where", "mars")]),
        call("finish", &[("result", "ok")]),
    ]);
    let mut agent =
        ReactAgent::new("t", Box::new(model.clone()), GuardPolicy::default()).expect("agent");

    assert_eq!(agent.run("task", 5).expect("run"), "ok");
    assert!(model.prompts()[1].contains("Error: unknown function 'teleport'"));
}

#[test]
fn edit_without_inspection_is_rejected_before_the_tool_runs() {
    let scripted = Arc::new(ScriptedSandbox::default());
    let sandbox: Arc<dyn Sandbox> = scripted.clone();
    let model = ScriptedModel::new([
        call(
            "replace_in_file",
            &[
                ("file_path", "src/app.py"),
                ("from_line", "1"),
                ("to_line", "2"),
                ("content", "pass"),
            ],
        ),
        call("finish", &[("result", "gave up")]),
    ]);
    let mut agent = assemble(&file_tools_config(), Box::new(model), &sandbox).expect("agent");

    assert_eq!(agent.run("task", 5).expect("run"), "gave up");

    let tools = tool_messages(&agent);
    assert_eq!(
        tools[0],
        "Edit blocked: inspect src/app.py first with show_file/show_file_range."
    );
    assert!(scripted.commands().is_empty());
}

#[test]
fn oversized_edit_is_rejected_after_inspection() {
    let scripted = Arc::new(ScriptedSandbox::new(vec![ok("     1\tx = 1\n")]));
    let sandbox: Arc<dyn Sandbox> = scripted.clone();
    let model = ScriptedModel::new([
        call("show_file", &[("file_path", "app.py")]),
        call(
            "replace_in_file",
            &[
                ("file_path", "app.py"),
                ("from_line", "10"),
                ("to_line", "200"),
                ("content", "pass"),
            ],
        ),
        call("finish", &[("result", "stop")]),
    ]);
    let mut agent = assemble(&file_tools_config(), Box::new(model), &sandbox).expect("agent");

    agent.run("task", 5).expect("run");

    let tools = tool_messages(&agent);
    assert_eq!(tools[1], "Edit blocked: requested range too large (>120 lines).");
    assert_eq!(scripted.commands(), vec!["cat -n app.py".to_string()]);
}

#[test]
fn backtracking_rewrites_instructions_and_prunes_context() {
    let scripted = Arc::new(ScriptedSandbox::new(vec![ok("first-attempt-output\n")]));
    let sandbox: Arc<dyn Sandbox> = scripted.clone();
    let model = ScriptedModel::new([
        call("run_bash_cmd", &[("command", "ls")]),
        call(
            "add_instructions_and_backtrack",
            &[("instructions", "Try the other module."), ("at_message_id", "2")],
        ),
        call("finish", &[("result", "second try")]),
    ]);
    let mut cfg = AgentConfig::default();
    cfg.tools.backtrack = true;
    let mut agent = assemble(&cfg, Box::new(model.clone()), &sandbox).expect("agent");

    assert_eq!(agent.run("task", 5).expect("run"), "second try");

    let prompts = model.prompts();
    assert!(prompts[1].contains("first-attempt-output"));
    let third = &prompts[2];
    assert!(third.contains("Try the other module."));
    assert!(third.contains("Updated instructions and backtracked to message 2."));
    assert!(!third.contains("first-attempt-output"));
    assert_eq!(agent.instructions(), "Try the other module.");

    let history = agent.history();
    let note = history
        .messages()
        .iter()
        .find(|m| m.content.starts_with("Updated instructions"))
        .expect("note");
    assert_eq!(note.parent, Some(agent.instructions_id()));
    // The abandoned attempt stays addressable.
    assert_eq!(
        history.get(4).expect("old tool output").content,
        "first-attempt-output\n"
    );
    assert!(validate_invariants(history).is_empty());
}

#[test]
fn backtrack_to_unknown_message_is_a_tool_error() {
    let model = ScriptedModel::new([
        call(
            "add_instructions_and_backtrack",
            &[("instructions", "x"), ("at_message_id", "999")],
        ),
        call("finish", &[("result", "ok")]),
    ]);
    let mut agent =
        ReactAgent::new("t", Box::new(model), GuardPolicy::default()).expect("agent");
    agent.enable_backtracking().expect("register");

    agent.run("task", 5).expect("run");

    let tools = tool_messages(&agent);
    assert!(tools[0].starts_with("Error executing add_instructions_and_backtrack:"));
    assert!(tools[0].contains("out of range"));
    assert_eq!(agent.instructions(), "");
}

#[test]
fn change_guard_holds_finish_until_a_diff_is_seen() {
    let diff = "diff --git a/app.py b/app.py\n--- a/app.py\n+++ b/app.py\n@@ -1 +1 @@\n-a\n+b\n";
    let scripted = Arc::new(ScriptedSandbox::new(vec![ok(diff)]));
    let sandbox: Arc<dyn Sandbox> = scripted.clone();
    let model = ScriptedModel::new([
        call("finish", &[("result", "too early")]),
        call("stage_and_diff", &[]),
        call("finish", &[("result", "fixed")]),
    ]);
    let mut cfg = file_tools_config();
    cfg.guards.require_change_before_finish = true;
    let mut agent = assemble(&cfg, Box::new(model.clone()), &sandbox).expect("agent");

    assert_eq!(agent.run("task", 5).expect("run"), "fixed");
    assert_eq!(model.calls(), 3);
    let tools = tool_messages(&agent);
    assert_eq!(tools[0], "too early");
    assert_eq!(tools[1], FINISH_BLOCKED);
    assert_eq!(
        scripted.commands(),
        vec!["git add -A && git diff --cached".to_string()]
    );
}

#[test]
fn inspect_then_edit_changes_the_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = temp.path().join("calc.py");
    std::fs::write(
        &file,
        "class Calc:\n    def add(self, a, b):\n        return a - b\n",
    )
    .expect("write");
    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalShell {
        shell: "bash".to_string(),
        workdir: temp.path().to_path_buf(),
        timeout: Duration::from_secs(30),
        output_limit_bytes: 100_000,
    });
    let model = ScriptedModel::new([
        call(
            "show_file_range",
            &[("file_path", "calc.py"), ("from_line", "2"), ("to_line", "3")],
        ),
        call(
            "replace_in_file",
            &[
                ("file_path", "calc.py"),
                ("from_line", "3"),
                ("to_line", "3"),
                ("content", "return a + b"),
            ],
        ),
        call("finish", &[("result", "fixed add")]),
    ]);
    let mut agent = assemble(&file_tools_config(), Box::new(model), &sandbox).expect("agent");

    assert_eq!(agent.run("fix add", 5).expect("run"), "fixed add");

    let tools = tool_messages(&agent);
    assert!(tools[0].contains("def add(self, a, b):"));
    assert_eq!(tools[1], "Replaced lines 3-3 in calc.py");
    assert_eq!(
        std::fs::read_to_string(&file).expect("read"),
        "class Calc:\n    def add(self, a, b):\n        return a + b\n"
    );
}

#[test]
fn trajectory_reflects_final_cursor() {
    let model = ScriptedModel::new([call("finish", &[("result", "done")])]);
    let mut agent =
        ReactAgent::new("traj", Box::new(model), GuardPolicy::default()).expect("agent");
    agent.run("task", 2).expect("run");

    let traj = agent.trajectory();
    assert_eq!(traj.name, "traj");
    assert_eq!(traj.root_message_id, Some(0));
    assert_eq!(traj.current_message_id, Some(agent.history().len() - 1));
    assert_eq!(traj.messages.len(), agent.history().len());
}
