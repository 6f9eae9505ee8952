//! Structural invariants of the history arena.

use crate::core::history::History;

/// Check the arena invariants:
/// - ids are dense and equal to their index
/// - exactly one root, and it is the first node
/// - every parent id is strictly smaller than its child's id
/// - every non-root node appears exactly once in its parent's children
/// - children entries point back at their parent
/// - `current` references an existing node
pub fn validate_invariants(history: &History) -> Vec<String> {
    let mut errors = Vec::new();
    let messages = history.messages();

    if messages.is_empty() {
        if history.current().is_some() || history.root().is_some() {
            errors.push("empty history must not have root/current".to_string());
        }
        return errors;
    }

    let roots: Vec<_> = messages.iter().filter(|m| m.parent.is_none()).collect();
    if roots.len() != 1 {
        errors.push(format!("expected exactly one root, found {}", roots.len()));
    }
    if history.root() != Some(0) {
        errors.push(format!("root must be message 0, got {:?}", history.root()));
    }

    for (index, message) in messages.iter().enumerate() {
        if message.id != index {
            errors.push(format!("message at index {index} has id {}", message.id));
        }
        if let Some(parent) = message.parent {
            if parent >= message.id {
                errors.push(format!(
                    "message {}: parent {parent} is not older than the child",
                    message.id
                ));
                continue;
            }
            let links = messages[parent]
                .children
                .iter()
                .filter(|child| **child == message.id)
                .count();
            if links != 1 {
                errors.push(format!(
                    "message {}: listed {links} times in parent {parent}",
                    message.id
                ));
            }
        }
        for child in &message.children {
            match messages.get(*child) {
                Some(node) if node.parent == Some(message.id) => {}
                Some(_) => errors.push(format!(
                    "message {}: child {child} does not point back",
                    message.id
                )),
                None => errors.push(format!(
                    "message {}: child {child} does not exist",
                    message.id
                )),
            }
        }
    }

    match history.current() {
        Some(current) if current < messages.len() => {}
        other => errors.push(format!("current {other:?} is not a valid message")),
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    #[test]
    fn fresh_and_branched_histories_are_valid() {
        let mut history = History::new();
        assert!(validate_invariants(&history).is_empty());

        history.append(Role::System, "s");
        let a = history.append(Role::User, "u");
        history.append(Role::Assistant, "x");
        history.backtrack(a).expect("backtrack");
        history.append(Role::Assistant, "y");

        let errors = validate_invariants(&history);
        assert!(errors.is_empty(), "unexpected: {errors:?}");
    }
}
