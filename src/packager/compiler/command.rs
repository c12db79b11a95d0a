//! Compiler command line assembly.
//!
//! Argument order is fixed: flags, source roots, imports, protection options,
//! exported jars, build descriptor, output folders.

use crate::packager::artifact::ArtifactKind;
use crate::packager::project::{AppType, Project};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Above this many import + protection arguments the list moves into an
/// argument file to stay clear of OS command line limits.
pub const ARGUMENT_FILE_THRESHOLD: usize = 30;

/// Directory below the project root for scratch files.
pub const SCRATCH_DIR: &str = ".codship";

/// A fully assembled compiler call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Indirection file to write before launching: path and content
    pub argument_file: Option<(PathBuf, String)>,
}

impl CompilerInvocation {
    /// Printable command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Joins paths with the platform path-list separator.
pub fn join_path_list(paths: &[PathBuf]) -> String {
    match std::env::join_paths(paths) {
        Ok(joined) => joined.to_string_lossy().into_owned(),
        // an entry contains the separator itself; keep every entry anyway
        Err(_) => paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(if cfg!(windows) { ";" } else { ":" }),
    }
}

/// Prepends `extra` to the current PATH.
pub fn merged_path(extra: Option<&Path>) -> Option<OsString> {
    let extra = extra?;
    let current = std::env::var_os("PATH").unwrap_or_default();
    let paths = std::iter::once(extra.to_path_buf()).chain(std::env::split_paths(&current));
    std::env::join_paths(paths).ok()
}

/// Libraries a project compiles against: the runtime API, every dependency's
/// jar, then the project's own container entries.
pub fn import_list(project: &Project, dependencies: &[Project]) -> Vec<PathBuf> {
    let mut imports = vec![project.toolchain().api_library()];
    imports.extend(
        dependencies
            .iter()
            .map(|d| d.artifact_path(ArtifactKind::Jar)),
    );
    for import in &project.compile_options().imports {
        let import = project.resolve(import);
        if !imports.contains(&import) {
            imports.push(import);
        }
    }
    imports
}

/// Assembles the compiler invocation for `project`.
pub fn build_invocation(project: &Project, dependencies: &[Project]) -> CompilerInvocation {
    let options = project.compile_options();
    let output_stem = project.standard_dir().join(project.base_name());
    let mut args = vec!["-quiet".to_string()];

    match project.app_type() {
        AppType::Library => args.push(format!("-library={}", output_stem.display())),
        AppType::Application | AppType::AlternateEntry => {
            args.push(format!("-codename={}", output_stem.display()))
        }
    }
    if options.compress_resources {
        args.push("-compressresources".into());
    }
    if options.convert_images {
        args.push("-convertpng".into());
    }
    if options.suppress_warnings {
        args.push("-nowarn".into());
    }
    if !options.aliases.is_empty() {
        args.push(format!("-alias={}", options.aliases.join(",")));
    }

    let source_roots = project.source_roots();
    if !source_roots.is_empty() {
        args.push(format!("-sourceroot={}", join_path_list(&source_roots)));
    }

    let imports = import_list(project, dependencies);
    let protection: Vec<String> = options
        .protection
        .iter()
        .map(|p| p.to_argument())
        .collect();
    let import_arg = format!("-import={}", join_path_list(&imports));

    let argument_file = if imports.len() + protection.len() > ARGUMENT_FILE_THRESHOLD {
        let path = project
            .root()
            .join(SCRATCH_DIR)
            .join(format!("{}_args.txt", project.base_name()));
        let mut content = import_arg;
        content.push('\n');
        for option in &protection {
            content.push_str(option);
            content.push('\n');
        }
        args.push(format!("@{}", path.display()));
        Some((path, content))
    } else {
        args.push(import_arg);
        args.extend(protection);
        None
    };

    args.extend(
        options
            .exported_jars
            .iter()
            .map(|jar| project.resolve(jar).display().to_string()),
    );
    args.push(
        project
            .artifact_path(ArtifactKind::Rapc)
            .display()
            .to_string(),
    );
    args.extend(
        project
            .output_folders()
            .iter()
            .map(|f| f.display().to_string()),
    );

    CompilerInvocation {
        program: project.toolchain().compiler_path(),
        args,
        working_dir: project.root().to_path_buf(),
        argument_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{
        CompileOptions, ProjectBuilder, ProtectionOption, ProtectionScope, Toolchain,
    };

    fn project(options: CompileOptions, app_type: AppType) -> Project {
        ProjectBuilder::new("app")
            .root("/work/app")
            .app_type(app_type)
            .toolchain(Toolchain::new("/opt/jde", "5.0.0"))
            .compile_options(options)
            .build()
            .unwrap()
    }

    fn protection(n: usize) -> Vec<ProtectionOption> {
        (0..n)
            .map(|i| ProtectionOption {
                scope: ProtectionScope::Package,
                name: format!("com.acme.p{i}"),
                tool: "ACME".into(),
            })
            .collect()
    }

    #[test]
    fn arguments_follow_fixed_order() {
        let lib = ProjectBuilder::new("lib")
            .root("/work/lib")
            .app_type(AppType::Library)
            .toolchain(Toolchain::new("/opt/jde", "5.0.0"))
            .build()
            .unwrap();
        let options = CompileOptions {
            convert_images: true,
            aliases: vec!["hello".into(), "hi".into()],
            source_roots: vec!["src".into()],
            protection: protection(1),
            exported_jars: vec!["libs/extra.jar".into()],
            ..Default::default()
        };
        let invocation = build_invocation(&project(options, AppType::Application), &[lib]);

        let expected: Vec<String> = vec![
            "-quiet".into(),
            "-codename=/work/app/deliverables/Standard/5.0.0/app".into(),
            "-convertpng".into(),
            "-alias=hello,hi".into(),
            "-sourceroot=/work/app/src".into(),
            format!(
                "-import={}",
                join_path_list(&[
                    "/opt/jde/lib/net_rim_api.jar".into(),
                    "/work/lib/deliverables/Standard/5.0.0/lib.jar".into()
                ])
            ),
            "package:com.acme.p0=ACME".into(),
            "/work/app/libs/extra.jar".into(),
            "/work/app/deliverables/Standard/5.0.0/app.rapc".into(),
            "/work/app/bin".into(),
        ];
        assert_eq!(invocation.args, expected);
        assert!(invocation.argument_file.is_none());
        assert_eq!(invocation.working_dir, PathBuf::from("/work/app"));
    }

    #[test]
    fn library_mode_uses_library_flag() {
        let invocation = build_invocation(
            &project(CompileOptions::default(), AppType::Library),
            &[],
        );
        assert_eq!(
            invocation.args[1],
            "-library=/work/app/deliverables/Standard/5.0.0/app"
        );
    }

    #[test]
    fn long_import_lists_move_to_argument_file() {
        let options = CompileOptions {
            // api jar + 29 protection options = 30, still inline
            protection: protection(29),
            ..Default::default()
        };
        let inline = build_invocation(&project(options, AppType::Application), &[]);
        assert!(inline.argument_file.is_none());

        let options = CompileOptions {
            protection: protection(30),
            ..Default::default()
        };
        let invocation = build_invocation(&project(options, AppType::Application), &[]);
        let (path, content) = invocation.argument_file.clone().unwrap();
        assert_eq!(path, PathBuf::from("/work/app/.codship/app_args.txt"));
        assert!(invocation.args.contains(&"@/work/app/.codship/app_args.txt".to_string()));
        assert!(!invocation.args.iter().any(|a| a.starts_with("-import=")));
        assert!(!invocation.args.iter().any(|a| a.starts_with("package:")));
        assert_eq!(content.lines().count(), 31);
        assert!(content.starts_with("-import="));
    }
}
