//! Configuration management for argus
//!
//! Configuration is a JSON document with the top-level sections `orchestrator`,
//! `llm`, `server`, `generator`, `output` and `workdir`. Every option that is
//! not present falls back to the defaults below.
//!
//! # Discovery
//!
//! 1. An explicit path (`--config <path>`), which must exist
//! 2. `argus.json` in the current directory
//! 3. `argus.config.json` in the current directory
//! 4. Built-in defaults
//!
//! The loaded [`ArgusConfig`] is a snapshot: it is built once per session,
//! validated, wrapped in an `Arc` and handed to every component that needs it.
//!
//! # Example
//!
//! ```no_run
//! use argus::ArgusConfig;
//!
//! let config = ArgusConfig::load(None).expect("Invalid configuration");
//! let image = config.get("server.tools.slither.docker.image");
//! println!("{:?}", image);
//! ```

use crate::docker::PullPolicy;
use crate::pipeline::Severity;
use crate::util::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// File names probed in the working directory, in order
pub const CONFIG_FILE_NAMES: [&str; 2] = ["argus.json", "argus.config.json"];

const DEFAULT_LLM: &str = "gemini";
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_FILTER_THRESHOLD: u8 = 7;
const DEFAULT_PROJECT_SEMANTIC_MAX_CONTRACTS: usize = 10;
const DEFAULT_CROSS_CONTRACT_MAX: usize = 5;
const DEFAULT_STATIC_ANALYSIS_ITERATIONS: usize = 20;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_TOOL_RESULT_LENGTH: usize = 50_000;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;
const DEFAULT_NETWORK_MODE: &str = "none";
const DEFAULT_PRIORITY_THRESHOLD: usize = 10;
const DEFAULT_TEST_FILE_PREFIX: &str = "Argus";
const DEFAULT_TEST_GENERATION_ITERATIONS: usize = 15;
const DEFAULT_OUTPUT_DIRECTORY: &str = "argus";

const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    "test",
    "tests",
    "build",
    "artifacts",
    "cache",
    ".git",
];

const DEFAULT_PROJECT_MARKERS: &[&str] = &[
    "hardhat.config.js",
    "hardhat.config.ts",
    "foundry.toml",
    "truffle-config.js",
    "package.json",
    "contracts",
];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not a valid configuration document
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Effective configuration snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgusConfig {
    pub orchestrator: OrchestratorConfig,
    pub llm: BTreeMap<String, LlmConfig>,
    pub server: ServerConfig,
    pub generator: GeneratorConfig,
    pub output: OutputConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// The document as written by the user, kept for lookups of keys the
    /// typed model does not know about
    #[serde(skip)]
    source_document: Value,

    #[serde(skip)]
    source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Name of the `llm.<name>` entry used for analysis phases
    pub llm: String,
    pub exclude_dirs: Vec<String>,
    pub project_markers: Vec<String>,
    pub parallel_file_analysis: bool,
    pub parallel_test_generation: bool,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub enable_contract_filtering: bool,
    pub filter_low_confidence_threshold: u8,
    pub skip_project_semantic_if_large: bool,
    pub project_semantic_max_contracts: usize,
    pub cross_contract: CrossContractConfig,
    pub static_analysis_max_iterations: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            llm: DEFAULT_LLM.to_string(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| s.to_string()).collect(),
            project_markers: DEFAULT_PROJECT_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            parallel_file_analysis: true,
            parallel_test_generation: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            enable_contract_filtering: true,
            filter_low_confidence_threshold: DEFAULT_FILTER_THRESHOLD,
            skip_project_semantic_if_large: true,
            project_semantic_max_contracts: DEFAULT_PROJECT_SEMANTIC_MAX_CONTRACTS,
            cross_contract: CrossContractConfig::default(),
            static_analysis_max_iterations: DEFAULT_STATIC_ANALYSIS_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossContractConfig {
    pub max_contracts: usize,
}

impl Default for CrossContractConfig {
    fn default() -> Self {
        Self {
            max_contracts: DEFAULT_CROSS_CONTRACT_MAX,
        }
    }
}

/// One `llm.<name>` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// genai adapter name; defaults to the entry name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key: String,
    pub max_retries: u32,
    /// Per-call timeout in seconds
    pub timeout: u64,
    pub max_tool_result_length: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: String::new(),
            api_key: String::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_LLM_TIMEOUT_SECS,
            max_tool_result_length: DEFAULT_MAX_TOOL_RESULT_LENGTH,
        }
    }
}

impl LlmConfig {
    fn builtin(name: &str) -> Option<Self> {
        let (model, api_key) = match name {
            "anthropic" => ("claude-sonnet-4-5-20250929", "ANTHROPIC_API_KEY"),
            "gemini" => ("gemini-2.5-flash", "GEMINI_API_KEY"),
            _ => return None,
        };
        Some(Self {
            model: model.to_string(),
            api_key: api_key.to_string(),
            ..Default::default()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Adapter name for this entry
    pub fn provider_name<'a>(&'a self, entry_name: &'a str) -> &'a str {
        self.provider.as_deref().unwrap_or(entry_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Cap on a single tool result payload, in characters
    pub max_result_length: usize,
    /// Orchestrator-level ceiling on one image pull, in seconds
    pub pull_timeout: u64,
    pub tools: BTreeMap<String, ToolConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let tools = ["slither", "mythril"]
            .iter()
            .filter_map(|name| ToolConfig::builtin(name).map(|t| (name.to_string(), t)))
            .collect();
        Self {
            max_result_length: DEFAULT_MAX_TOOL_RESULT_LENGTH,
            pull_timeout: DEFAULT_PULL_TIMEOUT_SECS,
            tools,
        }
    }
}

impl ServerConfig {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout)
    }
}

/// One `server.tools.<name>` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Entrypoint inside the image; the target path and caller arguments follow
    pub command: Vec<String>,
    /// Wall-clock bound in seconds
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outform: Option<String>,
    pub docker: DockerConfig,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout: DEFAULT_TOOL_TIMEOUT_SECS,
            outform: None,
            docker: DockerConfig::default(),
        }
    }
}

impl ToolConfig {
    fn builtin(name: &str) -> Option<Self> {
        let (command, image, outform): (&[&str], &str, Option<&str>) = match name {
            "slither" => (&["slither"], "trailofbits/eth-security-toolbox:latest", None),
            "mythril" => (&["myth", "analyze"], "mythril/myth:latest", Some("json")),
            _ => return None,
        };
        Some(Self {
            command: command.iter().map(|s| s.to_string()).collect(),
            outform: outform.map(str::to_string),
            docker: DockerConfig {
                image: image.to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub image: String,
    pub network_mode: String,
    pub remove_containers: bool,
    pub pull_policy: PullPolicy,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            network_mode: DEFAULT_NETWORK_MODE.to_string(),
            remove_containers: true,
            pull_policy: PullPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Name of the `llm.<name>` entry used for test generation
    pub llm: String,
    pub framework: String,
    pub test_generation: TestGenerationConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            llm: DEFAULT_LLM.to_string(),
            framework: "hardhat".to_string(),
            test_generation: TestGenerationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestGenerationConfig {
    pub priority_only_threshold: usize,
    pub priority_severities: Vec<Severity>,
    pub test_file_prefix: String,
    /// Tool-loop budget for writing one contract's test file
    pub max_iterations: usize,
}

impl Default for TestGenerationConfig {
    fn default() -> Self {
        Self {
            priority_only_threshold: DEFAULT_PRIORITY_THRESHOLD,
            priority_severities: vec![Severity::Critical, Severity::High],
            test_file_prefix: DEFAULT_TEST_FILE_PREFIX.to_string(),
            max_iterations: DEFAULT_TEST_GENERATION_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory, relative to the analyzed project, holding session outputs
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: DEFAULT_OUTPUT_DIRECTORY.to_string(),
        }
    }
}

impl Default for ArgusConfig {
    fn default() -> Self {
        let llm = ["anthropic", "gemini"]
            .iter()
            .filter_map(|name| LlmConfig::builtin(name).map(|c| (name.to_string(), c)))
            .collect();
        Self {
            orchestrator: OrchestratorConfig::default(),
            llm,
            server: ServerConfig::default(),
            generator: GeneratorConfig::default(),
            output: OutputConfig::default(),
            workdir: None,
            source_document: Value::Object(Default::default()),
            source_path: None,
        }
    }
}

impl ArgusConfig {
    /// Loads configuration relative to the current working directory
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Self::load_from(explicit, &cwd)
    }

    /// Loads configuration, probing `dir` for the default file names
    pub fn load_from(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) if path.is_file() => Some(path.to_path_buf()),
            Some(path) => return Err(ConfigError::NotFound(path.to_path_buf())),
            None => CONFIG_FILE_NAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|candidate| candidate.is_file()),
        };

        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration");
                let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let mut config = Self::parse(&content, &path)?;
                config.source_path = Some(path);
                config
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.workdir = Some(match config.workdir.take() {
            Some(workdir) if workdir.is_absolute() => workdir,
            Some(workdir) => dir.join(workdir),
            None => dir.to_path_buf(),
        });

        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration document without touching the filesystem
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config = Self::parse(content, Path::new("<inline>"))?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let document: Value = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: ArgusConfig =
            serde_json::from_value(document.clone()).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.source_document = document;
        config.fill_builtin_defaults();
        Ok(config)
    }

    /// Completes partially specified `llm.*` and `server.tools.*` entries
    fn fill_builtin_defaults(&mut self) {
        for name in ["anthropic", "gemini"] {
            let Some(builtin) = LlmConfig::builtin(name) else {
                continue;
            };
            let entry = self.llm.entry(name.to_string()).or_insert_with(|| builtin.clone());
            if entry.model.is_empty() {
                entry.model = builtin.model.clone();
            }
            if entry.api_key.is_empty() {
                entry.api_key = builtin.api_key.clone();
            }
        }

        for name in ["slither", "mythril"] {
            let Some(builtin) = ToolConfig::builtin(name) else {
                continue;
            };
            let entry = self
                .server
                .tools
                .entry(name.to_string())
                .or_insert_with(|| builtin.clone());
            if entry.command.is_empty() {
                entry.command = builtin.command.clone();
            }
            if entry.docker.image.is_empty() {
                entry.docker.image = builtin.docker.image.clone();
            }
            if entry.outform.is_none() {
                entry.outform = builtin.outform.clone();
            }
        }
    }

    /// Validates the snapshot
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationFailed(msg));

        if self.orchestrator.max_concurrency == 0 {
            return fail("orchestrator.max_concurrency must be at least 1".to_string());
        }
        if self.orchestrator.static_analysis_max_iterations == 0 {
            return fail(
                "orchestrator.static_analysis_max_iterations must be at least 1".to_string(),
            );
        }
        if self.orchestrator.project_markers.is_empty() {
            return fail("orchestrator.project_markers must not be empty".to_string());
        }

        for (section, name) in [
            ("orchestrator.llm", &self.orchestrator.llm),
            ("generator.llm", &self.generator.llm),
        ] {
            if !self.llm.contains_key(name) {
                return fail(format!("{} refers to unknown llm entry '{}'", section, name));
            }
        }

        for (name, llm) in &self.llm {
            if llm.model.is_empty() {
                return fail(format!("llm.{}.model is required", name));
            }
            if llm.timeout == 0 {
                return fail(format!("llm.{}.timeout must be positive", name));
            }
        }

        if self.server.pull_timeout == 0 {
            return fail("server.pull_timeout must be positive".to_string());
        }
        for (name, tool) in &self.server.tools {
            if tool.command.is_empty() {
                return fail(format!("server.tools.{}.command is required", name));
            }
            if tool.docker.image.is_empty() {
                return fail(format!("server.tools.{}.docker.image is required", name));
            }
            if tool.timeout == 0 {
                return fail(format!("server.tools.{}.timeout must be positive", name));
            }
            if tool.docker.network_mode != DEFAULT_NETWORK_MODE {
                return fail(format!(
                    "server.tools.{}.docker.network_mode must be 'none' (got '{}'): tools never get network access",
                    name, tool.docker.network_mode
                ));
            }
            if !tool.docker.remove_containers {
                return fail(format!(
                    "server.tools.{}.docker.remove_containers cannot be disabled",
                    name
                ));
            }
        }

        let tg = &self.generator.test_generation;
        if tg.priority_severities.is_empty() {
            return fail(
                "generator.test_generation.priority_severities must not be empty".to_string(),
            );
        }
        if tg.test_file_prefix.is_empty() {
            return fail("generator.test_generation.test_file_prefix must not be empty".to_string());
        }
        if tg.max_iterations == 0 {
            return fail("generator.test_generation.max_iterations must be at least 1".to_string());
        }

        let output = Path::new(&self.output.directory);
        if self.output.directory.is_empty() || output.is_absolute() {
            return fail("output.directory must be a non-empty relative path".to_string());
        }

        Ok(())
    }

    /// Resolves a dotted key (`server.tools.slither.timeout`) against the
    /// effective configuration
    pub fn get(&self, key: &str) -> Option<Value> {
        if key.is_empty() {
            return None;
        }
        let document = self.effective_document();
        let mut current = &document;
        for segment in key.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// The user document overlaid with every resolved default
    pub fn effective_document(&self) -> Value {
        let mut document = self.source_document.clone();
        match serde_json::to_value(self) {
            Ok(typed) => merge_values(&mut document, typed),
            Err(e) => debug!(error = %e, "Failed to serialize typed configuration"),
        }
        document
    }

    pub fn llm_config(&self, name: &str) -> Option<&LlmConfig> {
        self.llm.get(name)
    }

    pub fn tool_config(&self, name: &str) -> Option<&ToolConfig> {
        self.server.tools.get(name)
    }

    pub fn workdir(&self) -> PathBuf {
        self.workdir
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.orchestrator.retry_initial_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.orchestrator.retry_max_delay_ms)
    }

    /// Retry budget for transient failures of phases and image pulls
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.orchestrator.max_retries,
            self.retry_initial_delay(),
            self.retry_max_delay(),
        )
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
