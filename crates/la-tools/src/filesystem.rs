//! Filesystem tools: read, write, edit, glob.
//!
//! Paths are resolved against the tool context's working directory;
//! absolute paths are taken as-is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;

use la_core::{
    Error, PropertySchema, Tool, ToolContext, ToolDefinition, ToolOutcome, ToolParameters,
};

/// Longest read returned in one call, in lines.
const READ_LINE_CAP: usize = 2000;

fn resolve(working_dir: &Path, path: &str) -> PathBuf {
    let requested = Path::new(path);
    if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        working_dir.join(requested)
    }
}

// ---------------------------------------------------------------------------
// read
// ---------------------------------------------------------------------------

pub struct ReadTool;

#[derive(Deserialize)]
struct ReadArgs {
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file and return its contents with line numbers. Supports an optional line offset and limit for large files."
    }

    fn signature(&self) -> &str {
        "read(file_path, offset?, limit?)"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature()).with_parameters(
            ToolParameters::new()
                .add_property("file_path", PropertySchema::string("Path to the file"), true)
                .add_property(
                    "offset",
                    PropertySchema::integer("1-based line to start from"),
                    false,
                )
                .add_property(
                    "limit",
                    PropertySchema::integer("Maximum number of lines to return"),
                    false,
                ),
        )
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let args: ReadArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("read", format!("invalid arguments: {}", e)))?;

        let path = resolve(&ctx.working_dir, &args.file_path);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                return Ok(ToolOutcome::failure(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let offset = args.offset.unwrap_or(1).max(1);
        let limit = args.limit.unwrap_or(READ_LINE_CAP).min(READ_LINE_CAP);

        let mut out = String::new();
        for (number, line) in contents
            .lines()
            .enumerate()
            .skip(offset - 1)
            .take(limit)
        {
            out.push_str(&format!("{:>6}\t{}\n", number + 1, line));
        }
        Ok(ToolOutcome::success(out))
    }
}

// ---------------------------------------------------------------------------
// write
// ---------------------------------------------------------------------------

pub struct WriteTool;

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent directories are created as needed."
    }

    fn signature(&self) -> &str {
        "write(file_path, content)"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature()).with_parameters(
            ToolParameters::new()
                .add_property("file_path", PropertySchema::string("Path to write"), true)
                .add_property("content", PropertySchema::string("File contents"), true),
        )
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let args: WriteArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("write", format!("invalid arguments: {}", e)))?;

        let path = resolve(&ctx.working_dir, &args.file_path);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return Ok(ToolOutcome::failure(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                )));
            }
        }

        match fs::write(&path, &args.content).await {
            Ok(()) => Ok(ToolOutcome::success(format!(
                "Wrote {} bytes to {}",
                args.content.len(),
                path.display()
            ))),
            Err(e) => Ok(ToolOutcome::failure(format!(
                "cannot write {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// edit
// ---------------------------------------------------------------------------

pub struct EditTool;

#[derive(Deserialize)]
struct EditArgs {
    file_path: String,
    old_string: String,
    new_string: String,
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of a string in a file. Fails when the string is absent or matches more than once."
    }

    fn signature(&self) -> &str {
        "edit(file_path, old_string, new_string)"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature()).with_parameters(
            ToolParameters::new()
                .add_property("file_path", PropertySchema::string("Path to edit"), true)
                .add_property(
                    "old_string",
                    PropertySchema::string("Exact text to replace"),
                    true,
                )
                .add_property(
                    "new_string",
                    PropertySchema::string("Replacement text"),
                    true,
                ),
        )
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let args: EditArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("edit", format!("invalid arguments: {}", e)))?;

        let path = resolve(&ctx.working_dir, &args.file_path);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                return Ok(ToolOutcome::failure(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let matches = contents.matches(&args.old_string).count();
        if matches == 0 {
            return Ok(ToolOutcome::failure("old_string not found in file"));
        }
        if matches > 1 {
            return Ok(ToolOutcome::failure(format!(
                "old_string matches {} times; provide more context",
                matches
            )));
        }

        let updated = contents.replacen(&args.old_string, &args.new_string, 1);
        match fs::write(&path, updated).await {
            Ok(()) => Ok(ToolOutcome::success(format!("Edited {}", path.display()))),
            Err(e) => Ok(ToolOutcome::failure(format!(
                "cannot write {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// glob
// ---------------------------------------------------------------------------

pub struct GlobTool;

#[derive(Deserialize)]
struct GlobArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern, e.g. src/**/*.rs. Returns sorted paths."
    }

    fn signature(&self) -> &str {
        "glob(pattern, path?)"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.signature()).with_parameters(
            ToolParameters::new()
                .add_property("pattern", PropertySchema::string("Glob pattern"), true)
                .add_property(
                    "path",
                    PropertySchema::string("Directory to search from (default: working dir)"),
                    false,
                ),
        )
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, Error> {
        let args: GlobArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("glob", format!("invalid arguments: {}", e)))?;

        let root = match &args.path {
            Some(path) => resolve(&ctx.working_dir, path),
            None => ctx.working_dir.clone(),
        };
        let full_pattern = root.join(&args.pattern).display().to_string();

        let entries = match glob::glob(&full_pattern) {
            Ok(entries) => entries,
            Err(e) => return Ok(ToolOutcome::failure(format!("bad pattern: {}", e))),
        };

        let mut paths: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|path| path.display().to_string())
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Ok(ToolOutcome::success("No matches"));
        }
        Ok(ToolOutcome::success(paths.join("\n")))
    }
}
