//! Built-in tool executors.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{Value, json};
use steward_types::ApprovalRequest;

use super::{
    ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, ToolSettings, parse_args,
    resolve_path,
};
use crate::search::SearchFilesTool;
use crate::trash::{TRASH_DIR_NAME, Trash, TrashError};
use crate::web_search::WebSearchTool;

#[derive(Debug)]
pub struct ReadFileTool {
    max_read_bytes: u64,
}

impl ReadFileTool {
    #[must_use]
    pub fn new(max_read_bytes: u64) -> Self {
        Self { max_read_bytes }
    }
}

#[derive(Debug, Default)]
pub struct WriteFileTool;

#[derive(Debug, Default)]
pub struct DeleteFileTool;

#[derive(Debug, Default)]
pub struct ListDirectoryTool;

#[derive(Debug, Default)]
pub struct CreateDirectoryTool;

#[derive(Debug, Default)]
pub struct RunCommandTool;

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ListDirectoryArgs {
    #[serde(default = "default_list_path")]
    path: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    include_hidden: bool,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn failed(tool: &str, message: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool: tool.to_string(),
        message: message.into(),
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "required": ["path"]
    })
}

impl ToolExecutor for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a text file"
    }

    fn schema(&self) -> Value {
        path_schema("File path, relative to the workspace root")
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = resolve_path(&typed.path, &ctx.working_dir)?;
            let meta = match tokio::fs::metadata(&resolved).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ToolError::NotFound { path: typed.path });
                }
                Err(e) => return Err(failed(self.name(), e.to_string())),
            };
            if meta.is_dir() {
                return Err(failed(self.name(), format!("{} is a directory", typed.path)));
            }
            if meta.len() > self.max_read_bytes {
                return Err(failed(
                    self.name(),
                    format!(
                        "{} is too large ({} bytes, limit {})",
                        typed.path,
                        meta.len(),
                        self.max_read_bytes
                    ),
                ));
            }
            let bytes = tokio::fs::read(&resolved)
                .await
                .map_err(|e| failed(self.name(), e.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })
    }
}

impl ToolExecutor for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file, creating parent directories as needed"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace root" },
                "content": { "type": "string", "description": "Full file content to write" }
            },
            "required": ["path", "content"]
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteFileArgs = parse_args(&args)?;
            let resolved = resolve_path(&typed.path, &ctx.working_dir)?;
            let bytes = typed.content.into_bytes();
            let byte_len = bytes.len();

            let target = resolved.clone();
            tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
                .await
                .map_err(|e| failed(self.name(), e.to_string()))?
                .map_err(|e| {
                    failed(
                        self.name(),
                        format!("failed to write {}: {e}", resolved.display()),
                    )
                })?;

            Ok(format!("Wrote {byte_len} bytes to {}", typed.path))
        })
    }
}

/// Write through a sibling temp file and rename it into place, so readers
/// never observe a half-written file.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl ToolExecutor for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> &'static str {
        "Delete a file or directory by moving it to the workspace trash (reversible)"
    }

    fn schema(&self) -> Value {
        path_schema("Path to delete, relative to the workspace root")
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = resolve_path(&typed.path, &ctx.working_dir)?;
            let trash = Trash::new(&ctx.working_dir);
            let metadata = tokio::task::spawn_blocking(move || trash.move_to_trash(&resolved))
                .await
                .map_err(|e| failed(self.name(), e.to_string()))?
                .map_err(|e| match e {
                    TrashError::NotFound(_) => ToolError::NotFound {
                        path: typed.path.clone(),
                    },
                    other => failed(self.name(), other.to_string()),
                })?;
            Ok(format!(
                "Moved {} to trash (id: {})",
                typed.path, metadata.trash_id
            ))
        })
    }
}

impl ToolExecutor for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List the entries of a directory, one per line; directories end with '/'"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list (default: workspace root)" },
                "recursive": { "type": "boolean", "description": "Descend into subdirectories" },
                "include_hidden": { "type": "boolean", "description": "Include dotfiles" }
            }
        })
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ListDirectoryArgs = parse_args(&args)?;
            let resolved = resolve_path(&typed.path, &ctx.working_dir)?;
            match tokio::fs::metadata(&resolved).await {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(failed(
                        self.name(),
                        format!("{} is not a directory", typed.path),
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ToolError::NotFound { path: typed.path });
                }
                Err(e) => return Err(failed(self.name(), e.to_string())),
            }

            let (recursive, include_hidden) = (typed.recursive, typed.include_hidden);
            let entries = tokio::task::spawn_blocking(move || {
                list_entries(&resolved, recursive, include_hidden)
            })
            .await
            .map_err(|e| failed(self.name(), e.to_string()))?;

            if entries.is_empty() {
                return Ok("(empty directory)".to_string());
            }
            Ok(entries.join("\n"))
        })
    }
}

fn list_entries(root: &Path, recursive: bool, include_hidden: bool) -> Vec<String> {
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .hidden(!include_hidden)
        .max_depth(if recursive { None } else { Some(1) })
        .filter_entry(|entry| entry.file_name() != TRASH_DIR_NAME);

    let mut entries: Vec<String> = builder
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.depth() > 0)
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(root).ok()?;
            let mut line = rel.to_string_lossy().replace('\\', "/");
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                line.push('/');
            }
            Some(line)
        })
        .collect();
    entries.sort();
    entries
}

impl ToolExecutor for CreateDirectoryTool {
    fn name(&self) -> &'static str {
        "create_directory"
    }

    fn description(&self) -> &'static str {
        "Create a directory and any missing parents; an existing directory is not an error"
    }

    fn schema(&self) -> Value {
        path_schema("Directory to create, relative to the workspace root")
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let resolved = resolve_path(&typed.path, &ctx.working_dir)?;
            if let Ok(meta) = tokio::fs::metadata(&resolved).await {
                if meta.is_dir() {
                    return Ok(format!("Directory already exists: {}", typed.path));
                }
                return Err(failed(
                    self.name(),
                    format!("{} exists and is not a directory", typed.path),
                ));
            }
            tokio::fs::create_dir_all(&resolved)
                .await
                .map_err(|e| failed(self.name(), e.to_string()))?;
            Ok(format!("Created directory {}", typed.path))
        })
    }
}

impl ToolExecutor for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command. Every command is shown to the user and runs only after they approve it"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command line to run" },
                "cwd": { "type": "string", "description": "Working directory (default: workspace root)" },
                "reason": { "type": "string", "description": "Why the command is needed; shown to the user" }
            },
            "required": ["command"]
        })
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_request(&self, args: &Value, ctx: &ToolCtx) -> Result<ApprovalRequest, ToolError> {
        let typed: RunCommandArgs = parse_args(args)?;
        if typed.command.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "command must not be empty".to_string(),
            });
        }
        let working_directory = match typed.cwd.as_deref() {
            Some(cwd) => resolve_path(cwd, &ctx.working_dir)?,
            None => ctx.working_dir.clone(),
        };
        Ok(ApprovalRequest {
            command: typed.command,
            working_directory,
            reason: typed.reason.filter(|r| !r.trim().is_empty()),
        })
    }

    fn execute<'a>(&'a self, _args: Value, _ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            Err(ToolError::ApprovalRequired {
                tool: self.name().to_string(),
            })
        })
    }
}

pub fn register_builtins(
    registry: &mut ToolRegistry,
    settings: &ToolSettings,
) -> Result<(), ToolError> {
    registry.register(Arc::new(ReadFileTool::new(settings.max_read_bytes)))?;
    registry.register(Arc::new(WriteFileTool))?;
    registry.register(Arc::new(DeleteFileTool))?;
    registry.register(Arc::new(ListDirectoryTool))?;
    registry.register(Arc::new(CreateDirectoryTool))?;
    registry.register(Arc::new(SearchFilesTool::new(settings.search_max_results)))?;
    registry.register(Arc::new(RunCommandTool))?;
    registry.register(Arc::new(WebSearchTool::new(settings.web_search.clone())?))?;
    Ok(())
}

/// Numbered entry followed by indented detail lines.
pub(crate) fn numbered_block(index: usize, title: &str, lines: &[&str]) -> String {
    let mut out = format!("{index}. {title}");
    for line in lines.iter().filter(|l| !l.is_empty()) {
        let _ = write!(out, "\n   {line}");
    }
    out
}
