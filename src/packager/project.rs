//! Read-only project snapshots handed to the pipeline.
//!
//! A [`Project`] describes one application project: where it lives, what it
//! produces, what it depends on and how the external compiler has to be
//! driven for it. Snapshots are constructed via [`ProjectBuilder`].

use super::artifact::{Artifact, ArtifactKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Folder below the project root that receives deliverables.
pub const DELIVERABLES_DIR: &str = "deliverables";
/// Deliverables subfolder for the standard (wired install) layout.
pub const STANDARD_DIR: &str = "Standard";
/// Deliverables subfolder for the over-the-air layout.
pub const WEB_DIR: &str = "Web";

/// Kind of application a project builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppType {
    #[default]
    Application,
    Library,
    /// Secondary entry point into another project's code
    AlternateEntry,
}

/// Toolchain installation a project compiles against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Installation root (contains `bin/` and `lib/`)
    pub home: PathBuf,
    /// Target version, also the name of the version output folder (e.g. `5.0.0`)
    pub version: String,
    /// Extra directory merged into the compiler's PATH
    pub extra_path: Option<PathBuf>,
}

impl Toolchain {
    pub fn new(home: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            version: version.into(),
            extra_path: None,
        }
    }

    /// Path of the compiler executable.
    pub fn compiler_path(&self) -> PathBuf {
        let name = if cfg!(windows) { "rapc.exe" } else { "rapc" };
        self.home.join("bin").join(name)
    }

    /// Runtime API library every project imports.
    pub fn api_library(&self) -> PathBuf {
        self.home.join("lib").join("net_rim_api.jar")
    }

    /// Signing tool archive shipped with the toolchain.
    pub fn signing_tool(&self) -> PathBuf {
        self.home.join("bin").join("SignatureTool.jar")
    }

    /// Name of the version output folder below `Standard/` and `Web/`.
    pub fn output_folder_name(&self) -> &str {
        &self.version
    }
}

/// Scope of a protection option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionScope {
    Package,
    Class,
}

/// Restricts which callers may access a package or class.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ProtectionOption {
    pub scope: ProtectionScope,
    /// Package or class name
    pub name: String,
    /// Signer tag enforcing the restriction
    pub tool: String,
}

impl ProtectionOption {
    /// Compiler argument form: `package:<name>=<tool>` / `class:<name>=<tool>`
    pub fn to_argument(&self) -> String {
        let scope = match self.scope {
            ProtectionScope::Package => "package",
            ProtectionScope::Class => "class",
        };
        format!("{}:{}={}", scope, self.name, self.tool)
    }
}

/// Settings translated into compiler flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub compress_resources: bool,
    pub convert_images: bool,
    pub suppress_warnings: bool,
    /// Alternative module names
    pub aliases: Vec<String>,
    /// Source roots relative to the project root
    pub source_roots: Vec<PathBuf>,
    /// Additional libraries and container entries
    pub imports: Vec<PathBuf>,
    pub protection: Vec<ProtectionOption>,
    /// Jars exported into the compiled module
    pub exported_jars: Vec<PathBuf>,
}

/// What a project produces and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Base name of every artifact (`<base>.cod`, `<base>.jad`, ...)
    pub base_name: String,
    /// Class output folders relative to the project root
    pub output_folders: Vec<PathBuf>,
    /// Whether a descriptor should exist even if the compiler does not write one
    pub generate_manifest: bool,
}

/// Snapshot of one project for a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    name: String,
    root: PathBuf,
    app_type: AppType,
    dependencies: Vec<String>,
    output: OutputSettings,
    compile: CompileOptions,
    toolchain: Toolchain,
    descriptor_file: PathBuf,
    custom_descriptor: Option<PathBuf>,
    custom_build_script: Option<PathBuf>,
    properties: BTreeMap<String, String>,
}

impl Project {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_type(&self) -> AppType {
        self.app_type
    }

    /// Names of the directly declared dependency projects, in declaration order.
    pub fn dependency_names(&self) -> &[String] {
        &self.dependencies
    }

    pub fn output(&self) -> &OutputSettings {
        &self.output
    }

    pub fn base_name(&self) -> &str {
        &self.output.base_name
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.compile
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Application identity properties written into generated descriptors.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Resolves a project relative path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// The project descriptor/config file.
    pub fn descriptor_file(&self) -> PathBuf {
        self.resolve(&self.descriptor_file)
    }

    pub fn custom_descriptor(&self) -> Option<PathBuf> {
        self.custom_descriptor.as_deref().map(|p| self.resolve(p))
    }

    pub fn custom_build_script(&self) -> Option<PathBuf> {
        self.custom_build_script.as_deref().map(|p| self.resolve(p))
    }

    /// Absolute class output folders.
    pub fn output_folders(&self) -> Vec<PathBuf> {
        self.output
            .output_folders
            .iter()
            .map(|p| self.resolve(p))
            .collect()
    }

    /// Absolute source roots.
    pub fn source_roots(&self) -> Vec<PathBuf> {
        self.compile
            .source_roots
            .iter()
            .map(|p| self.resolve(p))
            .collect()
    }

    /// `<root>/deliverables/Standard`
    pub fn standard_root(&self) -> PathBuf {
        self.root.join(DELIVERABLES_DIR).join(STANDARD_DIR)
    }

    /// `<root>/deliverables/Standard/<version>`
    pub fn standard_dir(&self) -> PathBuf {
        self.standard_root()
            .join(self.toolchain.output_folder_name())
    }

    /// `<root>/deliverables/Web`
    pub fn web_root(&self) -> PathBuf {
        self.root.join(DELIVERABLES_DIR).join(WEB_DIR)
    }

    /// Path of an artifact of this project inside the standard folder.
    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.standard_dir()
            .join(Artifact::new(self.base_name(), kind).file_name())
    }

    /// The primary compiled artifact (debug symbols) used for staleness checks.
    pub fn compiled_artifact(&self) -> PathBuf {
        self.artifact_path(ArtifactKind::Debug)
    }

    pub fn is_library(&self) -> bool {
        self.app_type == AppType::Library
    }
}

/// Builder for constructing [`Project`].
///
/// # Examples
///
/// ```no_run
/// use codship::packager::{ProjectBuilder, Toolchain};
///
/// # fn example() -> codship::packager::Result<()> {
/// let project = ProjectBuilder::new("hello")
///     .root("/work/hello")
///     .toolchain(Toolchain::new("/opt/jde", "5.0.0"))
///     .dependencies(vec!["common".into()])
///     .build()?;
/// assert_eq!(project.base_name(), "hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ProjectBuilder {
    name: String,
    root: Option<PathBuf>,
    app_type: AppType,
    dependencies: Vec<String>,
    base_name: Option<String>,
    output_folders: Vec<PathBuf>,
    generate_manifest: bool,
    compile: CompileOptions,
    toolchain: Option<Toolchain>,
    descriptor_file: Option<PathBuf>,
    custom_descriptor: Option<PathBuf>,
    custom_build_script: Option<PathBuf>,
    properties: BTreeMap<String, String>,
}

impl ProjectBuilder {
    /// Creates a builder for the project called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the project root. Required.
    pub fn root<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.root = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn app_type(mut self, app_type: AppType) -> Self {
        self.app_type = app_type;
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the artifact base name.
    ///
    /// Default: the project name
    pub fn base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = Some(base_name.into());
        self
    }

    /// Sets the class output folders.
    ///
    /// Default: `bin`
    pub fn output_folders(mut self, folders: Vec<PathBuf>) -> Self {
        self.output_folders = folders;
        self
    }

    pub fn generate_manifest(mut self, generate: bool) -> Self {
        self.generate_manifest = generate;
        self
    }

    pub fn compile_options(mut self, options: CompileOptions) -> Self {
        self.compile = options;
        self
    }

    /// Sets the toolchain. Required.
    pub fn toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Sets the descriptor/config file.
    ///
    /// Default: `app_descriptor.xml` in the project root
    pub fn descriptor_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.descriptor_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn custom_descriptor(mut self, path: Option<PathBuf>) -> Self {
        self.custom_descriptor = path;
        self
    }

    pub fn custom_build_script(mut self, path: Option<PathBuf>) -> Self {
        self.custom_build_script = path;
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Builds the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or `root` / `toolchain` are missing.
    pub fn build(self) -> super::Result<Project> {
        use super::error::Context;

        if self.name.trim().is_empty() {
            return Err(super::Error::GenericError(
                "project name must not be empty".into(),
            ));
        }

        let base_name = self.base_name.unwrap_or_else(|| self.name.clone());
        let output_folders = if self.output_folders.is_empty() {
            vec![PathBuf::from("bin")]
        } else {
            self.output_folders
        };

        Ok(Project {
            root: self
                .root
                .context(format!("root is required for project `{}`", self.name))?,
            toolchain: self
                .toolchain
                .context(format!("toolchain is required for project `{}`", self.name))?,
            app_type: self.app_type,
            dependencies: self.dependencies,
            output: OutputSettings {
                base_name,
                output_folders,
                generate_manifest: self.generate_manifest,
            },
            compile: self.compile,
            descriptor_file: self
                .descriptor_file
                .unwrap_or_else(|| PathBuf::from("app_descriptor.xml")),
            custom_descriptor: self.custom_descriptor,
            custom_build_script: self.custom_build_script,
            properties: self.properties,
            name: self.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        ProjectBuilder::new("hello")
            .root("/work/hello")
            .toolchain(Toolchain::new("/opt/jde", "5.0.0"))
            .build()
            .unwrap()
    }

    #[test]
    fn deliverable_layout_follows_toolchain_version() {
        let p = project();
        assert_eq!(
            p.standard_dir(),
            PathBuf::from("/work/hello/deliverables/Standard/5.0.0")
        );
        assert_eq!(
            p.compiled_artifact(),
            PathBuf::from("/work/hello/deliverables/Standard/5.0.0/hello.debug")
        );
        assert_eq!(p.output_folders(), vec![PathBuf::from("/work/hello/bin")]);
    }

    #[test]
    fn missing_toolchain_is_reported() {
        let err = ProjectBuilder::new("x").root("/x").build().unwrap_err();
        assert!(err.to_string().contains("toolchain is required"));
    }

    #[test]
    fn protection_option_argument_form() {
        let option = ProtectionOption {
            scope: ProtectionScope::Class,
            name: "com.acme.Secret".into(),
            tool: "ACME".into(),
        };
        assert_eq!(option.to_argument(), "class:com.acme.Secret=ACME");
    }
}
