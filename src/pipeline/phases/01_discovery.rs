use crate::pipeline::phase::{
    AnalysisPhase, PhaseArtifact, PhaseContext, PhaseError, PhaseId, PhaseOutput,
};
use async_trait::async_trait;
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONTRACT_EXTENSION: &str = "sol";
pub const OUTPUT_SUBDIRS: [&str; 3] = ["contracts", "tests", "reports"];
const MAX_DOCUMENTATION_CHARS: usize = 20_000;

#[derive(Debug, Clone, Serialize)]
pub struct ContractFile {
    /// File name, or the relative path when two contracts share a file name
    pub name: String,
    pub relative_path: PathBuf,
    pub path: PathBuf,
    pub size: u64,
    #[serde(skip)]
    pub source: String,
}

impl ContractFile {
    /// `name` without the `.sol` extension, with path separators flattened
    /// to `_`; unique among the contracts of one discovery
    pub fn stem(&self) -> String {
        let name = self.name.strip_suffix(".sol").unwrap_or(&self.name);
        name.replace(['/', '\\'], "_")
    }

    pub fn relative_display(&self) -> String {
        self.relative_path.to_string_lossy().replace('\\', "/")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutput {
    pub contracts: Vec<ContractFile>,
    /// README and docs/ markdown, concatenated and capped
    pub documentation: String,
}

pub struct DiscoveryPhase;

#[async_trait]
impl AnalysisPhase for DiscoveryPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Discovery
    }

    async fn execute(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutput, PhaseError> {
        let project = ctx.project_path().to_path_buf();
        if !project.is_dir() {
            return Err(PhaseError::MissingInput(format!(
                "Project directory does not exist: {}",
                project.display()
            )));
        }

        for subdir in OUTPUT_SUBDIRS {
            fs::create_dir_all(ctx.output_dir().join(subdir))?;
        }

        let mut excluded = ctx.config().orchestrator.exclude_dirs.clone();
        excluded.push(ctx.config().output.directory.clone());

        let contracts = tokio::task::spawn_blocking(move || find_contracts(&project, &excluded))
            .await
            .map_err(|e| PhaseError::Internal(format!("Contract scan failed: {}", e)))?;

        if contracts.is_empty() {
            return Err(PhaseError::InvalidInput(format!(
                "No .{} files found under {}",
                CONTRACT_EXTENSION,
                ctx.project_path().display()
            )));
        }

        let documentation = gather_documentation(ctx.project_path());
        info!(
            contracts = contracts.len(),
            documentation_chars = documentation.len(),
            "Discovery complete"
        );

        let count = contracts.len();
        Ok(PhaseOutput::new(PhaseArtifact::Discovery(DiscoveryOutput {
            contracts,
            documentation,
        }))
        .with_note(format!("{} contracts discovered", count)))
    }
}

/// Walks `root` for contract sources, skipping excluded directory names
pub fn find_contracts(root: &Path, exclude_dirs: &[String]) -> Vec<ContractFile> {
    let mut override_builder = OverrideBuilder::new(root);
    for excluded in exclude_dirs {
        if let Err(e) = override_builder.add(&format!("!{}/", excluded)) {
            warn!(dir = %excluded, error = %e, "Ignoring invalid exclude pattern");
        }
    }
    let overrides = match override_builder.build() {
        Ok(overrides) => overrides,
        Err(e) => {
            warn!(error = %e, "Failed to build exclude patterns, scanning everything");
            ignore::overrides::Override::empty()
        }
    };

    let mut paths = Vec::new();
    for result in WalkBuilder::new(root)
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
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == CONTRACT_EXTENSION) {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut seen_names = HashSet::new();
    let mut contracts = Vec::with_capacity(paths.len());
    for path in paths {
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable contract");
                continue;
            }
        };
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = if seen_names.insert(file_name.clone()) {
            file_name
        } else {
            relative_path.to_string_lossy().replace('\\', "/")
        };
        debug!(contract = %name, "Found contract");
        contracts.push(ContractFile {
            name,
            size: source.len() as u64,
            relative_path,
            path,
            source,
        });
    }
    contracts
}

/// README plus `docs/**/*.md`, capped for prompt use
pub fn gather_documentation(root: &Path) -> String {
    let mut files: Vec<PathBuf> = ["README.md", "readme.md", "Readme.md"]
        .iter()
        .map(|name| root.join(name))
        .filter(|p| p.is_file())
        .take(1)
        .collect();

    let docs = root.join("docs");
    if docs.is_dir() {
        let mut doc_files: Vec<PathBuf> = WalkBuilder::new(&docs)
            .hidden(true)
            .build()
            .filter_map(Result::ok)
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        doc_files.sort();
        files.extend(doc_files);
    }

    let mut documentation = String::new();
    for file in files {
        let Ok(content) = fs::read_to_string(&file) else {
            continue;
        };
        let relative = file.strip_prefix(root).unwrap_or(&file);
        documentation.push_str(&format!("## {}\n\n{}\n\n", relative.display(), content.trim()));
        if documentation.chars().count() >= MAX_DOCUMENTATION_CHARS {
            documentation = documentation.chars().take(MAX_DOCUMENTATION_CHARS).collect();
            break;
        }
    }
    documentation
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_find_contracts_skips_excluded_dirs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "contracts/Vault.sol", "contract Vault {}");
        write(dir.path(), "contracts/lib/Math.sol", "library Math {}");
        write(dir.path(), "node_modules/dep/Dep.sol", "contract Dep {}");
        write(dir.path(), "test/Mock.sol", "contract Mock {}");
        write(dir.path(), "argus/20250101_000000/contracts/Copy.sol", "contract Copy {}");
        write(dir.path(), "contracts/notes.txt", "not a contract");

        let excluded = vec![
            "node_modules".to_string(),
            "test".to_string(),
            "argus".to_string(),
        ];
        let contracts = find_contracts(dir.path(), &excluded);

        let names: Vec<_> = contracts.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Math.sol", "Vault.sol"]);
        assert_eq!(contracts[1].source, "contract Vault {}");
        assert_eq!(contracts[1].stem(), "Vault");
        assert_eq!(contracts[1].relative_display(), "contracts/Vault.sol");
    }

    #[test]
    fn test_duplicate_file_names_use_relative_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/Token.sol", "contract A {}");
        write(dir.path(), "b/Token.sol", "contract B {}");

        let contracts = find_contracts(dir.path(), &[]);
        assert_eq!(contracts[0].name, "Token.sol");
        assert_eq!(contracts[1].name, "b/Token.sol");
        assert_eq!(contracts[0].stem(), "Token");
        assert_eq!(contracts[1].stem(), "b_Token");
    }

    #[test]
    fn test_gather_documentation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "README.md", "# Vault\nA vault.");
        write(dir.path(), "docs/design/overview.md", "Design notes");
        write(dir.path(), "docs/image.png", "binary");

        let docs = gather_documentation(dir.path());
        assert!(docs.contains("A vault."));
        assert!(docs.contains("Design notes"));
        assert!(!docs.contains("binary"));
    }
}
