//! Line-range replacement that keeps the inserted block at the surrounding scope.

/// How far above the edited range to look for an indentation hint.
const INDENT_PROBE_LINES: usize = 20;

/// Normalize newlines and expand tabs (including literal `\t` sequences) to four spaces.
pub fn sanitize_block(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace("\\t", "    ")
        .replace('\t', "    ")
}

/// Replace 1-based inclusive lines `from_line..=to_line` of `original` with
/// `replacement`, re-indenting the block to the replaced region's indentation.
///
/// A start beyond the end of the file appends; an end beyond it is clamped.
pub fn splice_lines(original: &str, from_line: usize, to_line: usize, replacement: &str) -> String {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let start = from_line.saturating_sub(1).min(lines.len());
    let end = to_line.min(lines.len()).max(start);

    let sanitized = sanitize_block(replacement);
    let block: Vec<&str> = sanitized.split_inclusive('\n').collect();

    let mut prefix = lines[start..end]
        .iter()
        .find(|line| !line.trim().is_empty())
        .map(|line| leading_ws(line))
        .unwrap_or("");
    if prefix.is_empty() && start > 0 {
        prefix = lines[start.saturating_sub(INDENT_PROBE_LINES)..start]
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| leading_ws(line))
            .unwrap_or("");
    }

    let non_empty: Vec<&str> = block
        .iter()
        .copied()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let common = non_empty
        .iter()
        .map(|line| leading_ws(line))
        .min_by_key(|ws| ws.len())
        .unwrap_or("");

    // A block that defines a top-level symbol must not inherit a nested scope.
    let introduces_toplevel = non_empty.iter().any(|line| {
        let core = strip_common(line, common);
        core == core.trim_start() && (core.starts_with("class ") || core.starts_with("def "))
    });
    if introduces_toplevel {
        prefix = "";
    }

    let mut out = String::with_capacity(original.len() + sanitized.len());
    for line in &lines[..start] {
        out.push_str(line);
    }
    if start == lines.len() && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    for line in &block {
        if line.trim().is_empty() {
            out.push_str(line);
        } else {
            out.push_str(prefix);
            out.push_str(strip_common(line, common));
        }
        if !line.ends_with('\n') {
            out.push('\n');
        }
    }
    for line in &lines[end..] {
        out.push_str(line);
    }
    out
}

fn leading_ws(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

fn strip_common<'a>(line: &'a str, common: &str) -> &'a str {
    line.strip_prefix(common)
        .unwrap_or_else(|| line.trim_start_matches([' ', '\t']))
}
