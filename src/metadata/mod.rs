//! Workspace manifest (`codship.toml`) loading.
//!
//! ```toml
//! [toolchain]
//! home = "/opt/jde-5.0.0"
//! version = "5.0.0"
//!
//! [signing]
//! mode = "if-protected-api-used"
//! password_env = "CODSHIP_SIGNING_PASSWORD"
//!
//! [deploy]
//! target = "device"
//! identifier = "any"
//!
//! [[project]]
//! name = "core"
//! type = "library"
//!
//! [[project]]
//! name = "app"
//! dependencies = ["core"]
//! source_roots = ["src"]
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use crate::error::{CliError, CodshipError, Result};
use crate::packager::device::{ANY_DEVICE, DeploymentTarget, TargetKind};
use crate::packager::signing::{SigningConfig, SigningMode};
use crate::packager::{
    AppType, CompileOptions, Project, ProjectBuilder, ProtectionOption, Toolchain,
};
use anyhow::Context as _;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Default manifest file name.
pub const MANIFEST_FILE: &str = "codship.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    toolchain: ToolchainSection,
    #[serde(default)]
    signing: SigningSection,
    #[serde(default)]
    deploy: DeploySection,
    #[serde(default, rename = "project")]
    projects: Vec<ProjectSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainSection {
    home: PathBuf,
    version: String,
    extra_path: Option<PathBuf>,
    /// Loader tool executable
    loader: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SigningSection {
    #[serde(default)]
    mode: SigningMode,
    tool: Option<PathBuf>,
    /// Environment variable holding the signing password
    password_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeploySection {
    #[serde(default)]
    target: TargetKind,
    identifier: Option<String>,
    directory: Option<PathBuf>,
    config_file: Option<String>,
    password_env: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectSection {
    name: String,
    /// Defaults to a folder named like the project
    root: Option<PathBuf>,
    #[serde(default, rename = "type")]
    app_type: AppType,
    #[serde(default)]
    dependencies: Vec<String>,
    base_name: Option<String>,
    output_folders: Option<Vec<PathBuf>>,
    #[serde(default)]
    source_roots: Vec<PathBuf>,
    #[serde(default)]
    imports: Vec<PathBuf>,
    #[serde(default)]
    exported_jars: Vec<PathBuf>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    protection: Vec<ProtectionOption>,
    #[serde(default)]
    compress_resources: bool,
    #[serde(default)]
    convert_images: bool,
    #[serde(default)]
    suppress_warnings: bool,
    #[serde(default)]
    generate_manifest: bool,
    descriptor: Option<PathBuf>,
    custom_descriptor: Option<PathBuf>,
    custom_build_script: Option<PathBuf>,
    /// Per-project toolchain override
    toolchain: Option<ToolchainSection>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// Deployment settings from `[deploy]`.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub target: DeploymentTarget,
    /// Device password, read from the configured environment variable
    pub password: Option<String>,
}

/// A loaded workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Directory holding the manifest
    pub root: PathBuf,
    pub toolchain: Toolchain,
    /// Explicit loader tool path
    pub loader: Option<PathBuf>,
    pub signing: SigningConfig,
    pub deploy: DeployConfig,
    /// Projects in manifest order
    pub projects: Vec<Project>,
}

impl Workspace {
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name() == name)
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.iter().map(|p| p.name().to_string()).collect()
    }

    /// Projects named in `names`, or all of them when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<Project>> {
        if names.is_empty() {
            return Ok(self.projects.clone());
        }
        names
            .iter()
            .map(|name| {
                self.project(name).cloned().ok_or_else(|| {
                    CodshipError::Cli(CliError::UnknownProject {
                        name: name.clone(),
                        known: self.project_names(),
                    })
                })
            })
            .collect()
    }
}

/// Loads the workspace manifest at `path`.
pub fn load_workspace(path: &Path) -> Result<Workspace> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    parse_workspace(&content, &root, path)
}

fn parse_workspace(content: &str, root: &Path, path: &Path) -> Result<Workspace> {
    let manifest: ManifestFile = toml::from_str(content)?;
    let invalid = |reason: String| {
        CodshipError::Cli(CliError::InvalidManifest {
            path: path.display().to_string(),
            reason,
        })
    };

    let resolve = |p: &Path| -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            root.join(p)
        }
    };
    let toolchain_of = |section: &ToolchainSection| {
        let mut toolchain = Toolchain::new(resolve(&section.home), section.version.clone());
        toolchain.extra_path = section.extra_path.as_deref().map(resolve);
        toolchain
    };
    let toolchain = toolchain_of(&manifest.toolchain);

    let mut seen = HashSet::new();
    let mut projects = Vec::new();
    for section in manifest.projects {
        if !seen.insert(section.name.clone()) {
            return Err(invalid(format!("project `{}` is defined twice", section.name)));
        }

        let compile = CompileOptions {
            compress_resources: section.compress_resources,
            convert_images: section.convert_images,
            suppress_warnings: section.suppress_warnings,
            aliases: section.aliases,
            source_roots: section.source_roots,
            imports: section.imports,
            protection: section.protection,
            exported_jars: section.exported_jars,
        };

        let mut builder = ProjectBuilder::new(&section.name)
            .root(resolve(
                section
                    .root
                    .as_deref()
                    .unwrap_or_else(|| Path::new(&section.name)),
            ))
            .app_type(section.app_type)
            .dependencies(section.dependencies)
            .compile_options(compile)
            .generate_manifest(section.generate_manifest)
            .toolchain(
                section
                    .toolchain
                    .as_ref()
                    .map(toolchain_of)
                    .unwrap_or_else(|| toolchain.clone()),
            )
            .custom_descriptor(section.custom_descriptor)
            .custom_build_script(section.custom_build_script)
            .properties(section.properties);
        if let Some(base_name) = section.base_name {
            builder = builder.base_name(base_name);
        }
        if let Some(folders) = section.output_folders {
            builder = builder.output_folders(folders);
        }
        if let Some(descriptor) = section.descriptor {
            builder = builder.descriptor_file(descriptor);
        }
        projects.push(builder.build().map_err(|e| invalid(e.to_string()))?);
    }

    for project in &projects {
        if let Some(missing) = project
            .dependency_names()
            .iter()
            .find(|d| !seen.contains(*d))
        {
            return Err(invalid(format!(
                "project `{}` depends on undefined project `{}`",
                project.name(),
                missing
            )));
        }
    }

    let password_from = |var: &Option<String>| var.as_deref().and_then(|v| std::env::var(v).ok());
    let signing = SigningConfig {
        mode: manifest.signing.mode,
        tool: manifest.signing.tool.as_deref().map(resolve),
        password: password_from(&manifest.signing.password_env),
    };

    let deploy = &manifest.deploy;
    let target = DeploymentTarget {
        kind: deploy.target,
        identifier: deploy.identifier.clone().unwrap_or_else(|| match deploy.target {
            TargetKind::Device => ANY_DEVICE.to_string(),
            TargetKind::Simulator => String::new(),
        }),
        directory: deploy
            .directory
            .as_deref()
            .map(resolve)
            .unwrap_or_else(|| toolchain.home.join("simulator")),
        config_file: deploy.config_file.clone().unwrap_or_default(),
    };

    Ok(Workspace {
        root: root.to_path_buf(),
        loader: manifest.toolchain.loader.as_deref().map(resolve),
        toolchain,
        signing,
        deploy: DeployConfig {
            target,
            password: password_from(&deploy.password_env),
        },
        projects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::ProtectionScope;

    const MANIFEST: &str = r#"
[toolchain]
home = "jde"
version = "5.0.0"

[signing]
mode = "force"

[deploy]
target = "device"

[[project]]
name = "core"
type = "library"

[[project]]
name = "app"
root = "apps/hello"
dependencies = ["core"]
base_name = "hello"
source_roots = ["src"]
protection = [{ scope = "package", name = "com.acme.secure", tool = "ACME" }]
generate_manifest = true

[project.properties]
MIDlet-Vendor = "Acme"
"#;

    fn parse(content: &str) -> Result<Workspace> {
        parse_workspace(content, Path::new("/ws"), Path::new("/ws/codship.toml"))
    }

    #[test]
    fn manifest_builds_project_snapshots() {
        let ws = parse(MANIFEST).unwrap();
        assert_eq!(ws.project_names(), ["core", "app"]);
        assert_eq!(ws.signing.mode, SigningMode::Force);
        assert_eq!(ws.deploy.target.kind, TargetKind::Device);
        assert!(ws.deploy.target.is_any_device());

        let core = ws.project("core").unwrap();
        assert_eq!(core.root(), Path::new("/ws/core"));
        assert!(core.is_library());

        let app = ws.project("app").unwrap();
        assert_eq!(app.root(), Path::new("/ws/apps/hello"));
        assert_eq!(app.base_name(), "hello");
        assert_eq!(app.dependency_names(), ["core"]);
        assert_eq!(app.toolchain().home, PathBuf::from("/ws/jde"));
        assert_eq!(app.compile_options().protection[0].scope, ProtectionScope::Package);
        assert_eq!(app.properties()["MIDlet-Vendor"], "Acme");
        assert!(app.output().generate_manifest);
    }

    #[test]
    fn selection_rejects_unknown_projects() {
        let ws = parse(MANIFEST).unwrap();
        assert_eq!(ws.select(&[]).unwrap().len(), 2);
        assert_eq!(ws.select(&["app".into()]).unwrap()[0].name(), "app");
        assert!(matches!(
            ws.select(&["nope".into()]),
            Err(CodshipError::Cli(CliError::UnknownProject { .. }))
        ));
    }

    #[test]
    fn inconsistent_manifests_are_rejected() {
        let duplicate = "[toolchain]\nhome = \"j\"\nversion = \"5.0.0\"\n[[project]]\nname = \"a\"\n[[project]]\nname = \"a\"\n";
        assert!(matches!(
            parse(duplicate),
            Err(CodshipError::Cli(CliError::InvalidManifest { .. }))
        ));

        let dangling = "[toolchain]\nhome = \"j\"\nversion = \"5.0.0\"\n[[project]]\nname = \"a\"\ndependencies = [\"b\"]\n";
        assert!(parse(dangling).unwrap_err().to_string().contains("undefined project `b`"));

        assert!(matches!(parse("[toolchain]\nhome = 1\n"), Err(CodshipError::Toml(_))));
    }
}
