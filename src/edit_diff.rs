use diffy::DiffOptions;

pub const PATCH_CONTEXT_LINES: usize = 3;

/// Unified diff of `old` against `new`, labelled `a/<name>` and `b/<name>`.
/// Identical inputs produce just the two header lines.
pub fn generate_patch(name: &str, old: &str, new: &str) -> String {
    let mut options = DiffOptions::new();
    options.set_context_len(PATCH_CONTEXT_LINES);
    let rendered = options.create_patch(old, new).to_string();

    let mut out = format!("--- a/{name}\n+++ b/{name}\n");
    for line in rendered
        .lines()
        .skip_while(|line| line.starts_with("--- ") || line.starts_with("+++ "))
    {
        out.push_str(line);
        out.push('\n');
    }
    out
}
