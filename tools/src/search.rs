//! Substring search across workspace text files.

use std::io::Read;
use std::path::Path;

use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{Value, json};
use steward_types::truncate_with_ellipsis;

use super::{ToolCtx, ToolError, ToolExecutor, ToolFut, parse_args, resolve_path};
use crate::trash::TRASH_DIR_NAME;

const SEARCH_TOOL_NAME: &str = "search_files";
/// Files larger than this are skipped rather than scanned.
const MAX_SCAN_BYTES: u64 = 2 * 1024 * 1024;
const MAX_LINE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    /// Workspace-relative path with forward slashes.
    pub path: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based character column of the first match on the line.
    pub column: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub matches: Vec<SearchMatch>,
    /// More matches existed than `max_results`.
    pub truncated: bool,
}

#[derive(Debug)]
pub struct SearchFilesTool {
    max_results: usize,
}

impl SearchFilesTool {
    #[must_use]
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results: max_results.max(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
}

impl ToolExecutor for SearchFilesTool {
    fn name(&self) -> &'static str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Search text files for a substring; returns path:line:col: text lines"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to search for" },
                "path": { "type": "string", "description": "Directory or file to search (default: workspace root)" },
                "case_sensitive": { "type": "boolean", "description": "Match case exactly (default: false)" }
            },
            "required": ["query"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: SearchArgs = parse_args(&args)?;
            if typed.query.is_empty() {
                return Err(ToolError::BadArgs {
                    message: "query must not be empty".to_string(),
                });
            }
            let scope = resolve_path(typed.path.as_deref().unwrap_or("."), &ctx.working_dir)?;
            if !scope.exists() {
                return Err(ToolError::NotFound {
                    path: typed.path.unwrap_or_else(|| ".".to_string()),
                });
            }

            let workspace = ctx.working_dir.clone();
            let max_results = self.max_results;
            let query = typed.query.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                search_files(&workspace, &scope, &query, typed.case_sensitive, max_results)
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: SEARCH_TOOL_NAME.to_string(),
                message: e.to_string(),
            })?;

            Ok(format_outcome(&typed.query, &outcome, max_results))
        })
    }
}

/// Walk `scope` (gitignore-aware) and collect up to `max_results` matches.
#[must_use]
pub fn search_files(
    workspace: &Path,
    scope: &Path,
    query: &str,
    case_sensitive: bool,
    max_results: usize,
) -> SearchOutcome {
    let needle = if case_sensitive {
        query.to_string()
    } else {
        query.to_lowercase()
    };

    let mut builder = WalkBuilder::new(scope);
    builder
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            let name = entry.file_name();
            name != ".git" && name != TRASH_DIR_NAME
        });

    let mut matches = Vec::new();
    for entry in builder.build().filter_map(Result::ok) {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Some(content) = read_text(entry.path()) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(workspace)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        for (idx, line) in content.lines().enumerate() {
            let haystack = if case_sensitive {
                line.to_string()
            } else {
                line.to_lowercase()
            };
            let Some(byte_col) = haystack.find(&needle) else {
                continue;
            };
            if matches.len() == max_results {
                return SearchOutcome {
                    matches,
                    truncated: true,
                };
            }
            matches.push(SearchMatch {
                path: rel.clone(),
                line: idx + 1,
                column: haystack[..byte_col].chars().count() + 1,
                text: truncate_with_ellipsis(line, MAX_LINE_CHARS),
            });
        }
    }

    SearchOutcome {
        matches,
        truncated: false,
    }
}

/// Contents of a text file, or `None` for binary, oversized or unreadable files.
fn read_text(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MAX_SCAN_BYTES {
        return None;
    }
    let mut bytes = Vec::with_capacity(meta.len() as usize);
    std::fs::File::open(path).ok()?.read_to_end(&mut bytes).ok()?;
    let sniff = &bytes[..bytes.len().min(8192)];
    if sniff.contains(&0) {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn format_outcome(query: &str, outcome: &SearchOutcome, max_results: usize) -> String {
    if outcome.matches.is_empty() {
        return format!("No matches found for '{query}'");
    }
    let mut lines: Vec<String> = outcome
        .matches
        .iter()
        .map(|m| format!("{}:{}:{}: {}", m.path, m.line, m.column, m.text))
        .collect();
    if outcome.truncated {
        lines.push(format!(
            "... (truncated: more than {max_results} matches)"
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::fmt::Write as _;
    use std::fs;

    use serde_json::json;

    use super::{SearchFilesTool, search_files};
    use crate::{ToolCtx, ToolExecutor};

    fn write_matches(dir: &std::path::Path, name: &str, count: usize) {
        let mut body = String::new();
        for i in 0..count {
            let _ = writeln!(body, "line {i} has TODO marker");
        }
        fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn caps_results_and_marks_truncation() {
        let dir = tempfile::tempdir().unwrap();
        write_matches(dir.path(), "a.txt", 20);
        write_matches(dir.path(), "b.txt", 17);

        let out = SearchFilesTool::new(20)
            .execute(json!({"query": "todo"}), &ToolCtx::new("c", dir.path()))
            .await
            .unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 21);
        assert!(lines[..20].iter().all(|l| l.contains(": line ")));
        assert_eq!(lines[20], "... (truncated: more than 20 matches)");
    }

    #[tokio::test]
    async fn exactly_cap_matches_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        write_matches(dir.path(), "a.txt", 3);
        let out = SearchFilesTool::new(3)
            .execute(json!({"query": "TODO"}), &ToolCtx::new("c", dir.path()))
            .await
            .unwrap();
        assert_eq!(out.lines().count(), 3);
        assert!(!out.contains("truncated"));
    }

    #[test]
    fn reports_one_based_line_and_column() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {\n    let needle = 1;\n}\n")
            .unwrap();

        let outcome = search_files(dir.path(), dir.path(), "needle", true, 10);
        assert!(!outcome.truncated);
        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!((m.path.as_str(), m.line, m.column), ("src/main.rs", 2, 9));
    }

    #[test]
    fn case_sensitivity_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "Alpha\nalpha\n").unwrap();
        assert_eq!(
            search_files(dir.path(), dir.path(), "Alpha", true, 10)
                .matches
                .len(),
            1
        );
        assert_eq!(
            search_files(dir.path(), dir.path(), "Alpha", false, 10)
                .matches
                .len(),
            2
        );
    }

    #[test]
    fn skips_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blob.bin"), b"needle\0\x01\x02").unwrap();
        assert!(
            search_files(dir.path(), dir.path(), "needle", true, 10)
                .matches
                .is_empty()
        );
    }

    #[tokio::test]
    async fn no_matches_is_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "nothing here").unwrap();
        let out = SearchFilesTool::new(20)
            .execute(json!({"query": "absent"}), &ToolCtx::new("c", dir.path()))
            .await
            .unwrap();
        assert_eq!(out, "No matches found for 'absent'");
    }
}
