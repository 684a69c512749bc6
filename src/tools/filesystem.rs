//! In-process file tools
//!
//! `read_file`, `list_directory` and `find_files` are read-only and confined
//! to the analyzed project. `write_file` is confined to the session output
//! directory, so a reasoning agent can never modify the sources it audits.

use async_trait::async_trait;
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use super::error::ToolError;
use super::schema::{ArgumentSchema, ArgumentType};
use super::trait_def::{Tool, ToolKind};

const MAX_FILE_SIZE: u64 = 1024 * 1024;
const DEFAULT_MAX_LINES: usize = 2000;
const DEFAULT_MAX_RESULTS: usize = 200;

/// A directory the file tools are confined to
#[derive(Debug, Clone)]
pub struct ConfinedRoot {
    root: PathBuf,
}

impl ConfinedRoot {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ToolError::NotFound(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// Root for files this process creates; it need not exist yet
    pub fn for_output(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves an existing path, rejecting anything that lands outside
    pub fn validate_existing(&self, path: &str) -> Result<PathBuf, ToolError> {
        let normalized = path.trim_start_matches('/');
        let full_path = self.root.join(normalized);

        if !full_path.exists() {
            return Err(ToolError::NotFound(format!(
                "File or directory does not exist: {}",
                path
            )));
        }

        let canonical = full_path.canonicalize()?;
        if !canonical.starts_with(&self.root) {
            warn!(
                requested_path = path,
                canonical = %canonical.display(),
                root = %self.root.display(),
                "Path traversal attempt detected"
            );
            return Err(ToolError::InvalidArguments(format!(
                "Path traversal detected: {:?} is outside {}",
                path,
                self.root.display()
            )));
        }

        Ok(canonical)
    }

    /// Resolves a path that may not exist yet; only plain relative
    /// components are accepted
    pub fn validate_new(&self, path: &str) -> Result<PathBuf, ToolError> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(ToolError::InvalidArguments(format!(
                        "Path must be relative and stay inside the output directory: {}",
                        path
                    )))
                }
            }
        }
        if resolved == self.root {
            return Err(ToolError::InvalidArguments("Path names no file".into()));
        }
        Ok(resolved)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

fn is_binary(path: &Path) -> Result<bool, ToolError> {
    let mut file = std::fs::File::open(path)?;
    let mut buffer = [0u8; 512];
    let bytes_read = file.read(&mut buffer)?;
    Ok(buffer[..bytes_read].contains(&0))
}

fn str_arg<'a>(arguments: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{}' parameter", name)))
}

fn usize_arg(arguments: &Map<String, Value>, name: &str, default: usize) -> usize {
    arguments
        .get(name)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub struct ReadFileTool {
    root: ConfinedRoot,
    schema: ArgumentSchema,
}

impl ReadFileTool {
    pub fn new(root: ConfinedRoot) -> Self {
        Self {
            root,
            schema: ArgumentSchema::new()
                .required("path", ArgumentType::String, "File path relative to the project root")
                .optional("max_lines", ArgumentType::Integer, "Maximum number of lines to return"),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn description(&self) -> &str {
        "Read a source file of the analyzed project"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::InProcess
    }

    fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let path = str_arg(&arguments, "path")?;
        let max_lines = usize_arg(&arguments, "max_lines", DEFAULT_MAX_LINES);
        let file_path = self.root.validate_existing(path)?;

        if !file_path.is_file() {
            return Err(ToolError::InvalidArguments(format!("Not a file: {}", path)));
        }
        let metadata = tokio::fs::metadata(&file_path).await?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(ToolError::InvalidArguments(format!(
                "File too large: {} bytes (max: {} bytes)",
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }
        if is_binary(&file_path)? {
            return Err(ToolError::InvalidArguments(format!(
                "Cannot read binary file: {}",
                path
            )));
        }

        let content = tokio::fs::read_to_string(&file_path).await?;
        let total_lines = content.lines().count();
        let lines: Vec<&str> = content.lines().take(max_lines).collect();
        debug!(path, lines_returned = lines.len(), total_lines, "read_file completed");

        Ok(json!({
            "path": self.root.relative(&file_path),
            "content": lines.join("\n"),
            "total_lines": total_lines,
            "truncated": total_lines > lines.len(),
        }))
    }
}

pub struct ListDirectoryTool {
    root: ConfinedRoot,
    schema: ArgumentSchema,
}

impl ListDirectoryTool {
    pub fn new(root: ConfinedRoot) -> Self {
        Self {
            root,
            schema: ArgumentSchema::new().optional(
                "path",
                ArgumentType::String,
                "Directory relative to the project root; defaults to the root",
            ),
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn description(&self) -> &str {
        "List the entries of a project directory"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::InProcess
    }

    fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let path = arguments.get("path").and_then(Value::as_str).unwrap_or(".");
        let dir = self.root.validate_existing(path)?;
        if !dir.is_dir() {
            return Err(ToolError::InvalidArguments(format!("Not a directory: {}", path)));
        }

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": if file_type.is_dir() { "directory" } else { "file" },
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(json!({
            "path": self.root.relative(&dir),
            "entries": entries,
        }))
    }
}

pub struct FindFilesTool {
    root: ConfinedRoot,
    exclude_dirs: Vec<String>,
    schema: ArgumentSchema,
}

impl FindFilesTool {
    pub fn new(root: ConfinedRoot, exclude_dirs: Vec<String>) -> Self {
        Self {
            root,
            exclude_dirs,
            schema: ArgumentSchema::new()
                .required("pattern", ArgumentType::String, "Glob pattern, e.g. '**/*.sol'")
                .optional("max_results", ArgumentType::Integer, "Maximum number of paths"),
        }
    }
}

#[async_trait]
impl Tool for FindFilesTool {
    fn description(&self) -> &str {
        "Find project files matching a glob pattern"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::InProcess
    }

    fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let pattern = str_arg(&arguments, "pattern")?;
        let max_results = usize_arg(&arguments, "max_results", DEFAULT_MAX_RESULTS);
        let root = self.root.path().to_path_buf();

        let mut builder = OverrideBuilder::new(&root);
        builder
            .add(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern: {}", e)))?;
        for excluded in &self.exclude_dirs {
            builder.add(&format!("!{}/", excluded)).ok();
        }
        let overrides = builder
            .build()
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid pattern: {}", e)))?;

        let mut matches = Vec::new();
        let mut limited = false;
        for result in WalkBuilder::new(&root)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .overrides(overrides)
            .build()
        {
            let entry = match result {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "Failed to read directory entry");
                    continue;
                }
            };
            if !entry.path().is_file() {
                continue;
            }
            if matches.len() >= max_results {
                limited = true;
                break;
            }
            matches.push(self.root.relative(entry.path()));
        }
        matches.sort();

        Ok(json!({
            "pattern": pattern,
            "matches": matches,
            "limited": limited,
        }))
    }
}

pub struct WriteFileTool {
    root: ConfinedRoot,
    schema: ArgumentSchema,
}

impl WriteFileTool {
    pub fn new(output_root: ConfinedRoot) -> Self {
        Self {
            root: output_root,
            schema: ArgumentSchema::new()
                .required("path", ArgumentType::String, "File path relative to the output directory")
                .required("content", ArgumentType::String, "File content"),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn description(&self) -> &str {
        "Write a new file into the analysis output directory"
    }

    fn kind(&self) -> ToolKind {
        ToolKind::InProcess
    }

    fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        let path = str_arg(&arguments, "path")?;
        let content = str_arg(&arguments, "content")?;
        let target = self.root.validate_new(path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    ToolError::InvalidArguments(format!("File already exists: {}", path))
                }
                _ => ToolError::Io(e),
            })?;
        tokio::io::AsyncWriteExt::write_all(&mut file, content.as_bytes()).await?;

        Ok(json!({
            "path": self.root.relative(&target),
            "bytes_written": content.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("contracts/lib")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(dir.path().join("contracts/Vault.sol"), "line1\nline2\nline3").unwrap();
        fs::write(dir.path().join("contracts/lib/Math.sol"), "library Math {}").unwrap();
        fs::write(dir.path().join("node_modules/dep/Dep.sol"), "").unwrap();
        dir
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_read_file_with_line_limit() {
        let dir = project();
        let tool = ReadFileTool::new(ConfinedRoot::new(dir.path()).unwrap());

        let result = tool
            .execute(args(json!({"path": "contracts/Vault.sol", "max_lines": 2})))
            .await
            .unwrap();

        assert_eq!(result["content"], "line1\nline2");
        assert_eq!(result["total_lines"], 3);
        assert_eq!(result["truncated"], true);
    }

    #[tokio::test]
    async fn test_read_file_rejects_traversal() {
        let dir = project();
        let tool = ReadFileTool::new(ConfinedRoot::new(dir.path().join("contracts")).unwrap());

        let err = tool
            .execute(args(json!({"path": "../node_modules/dep/Dep.sol"})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Path traversal"));
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = project();
        let tool = ListDirectoryTool::new(ConfinedRoot::new(dir.path()).unwrap());

        let result = tool.execute(args(json!({"path": "contracts"}))).await.unwrap();
        let names: Vec<&str> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Vault.sol", "lib"]);
    }

    #[tokio::test]
    async fn test_find_files_skips_excluded_dirs() {
        let dir = project();
        let tool = FindFilesTool::new(
            ConfinedRoot::new(dir.path()).unwrap(),
            vec!["node_modules".to_string()],
        );

        let result = tool.execute(args(json!({"pattern": "*.sol"}))).await.unwrap();
        assert_eq!(
            result["matches"],
            json!(["contracts/Vault.sol", "contracts/lib/Math.sol"])
        );
    }

    #[tokio::test]
    async fn test_write_file_confined_and_create_new() {
        let out = TempDir::new().unwrap();
        let tool = WriteFileTool::new(ConfinedRoot::new(out.path()).unwrap());

        tool.execute(args(json!({"path": "notes/a.md", "content": "hi"})))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(out.path().join("notes/a.md")).unwrap(), "hi");

        let again = tool
            .execute(args(json!({"path": "notes/a.md", "content": "bye"})))
            .await;
        assert!(again.is_err());

        let escape = tool
            .execute(args(json!({"path": "../escape.md", "content": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(escape, ToolError::InvalidArguments(_)));
    }
}
