//! Build artifacts and sibling discovery.
//!
//! An artifact is identified by base name, kind (extension) and an optional
//! sibling index. A binary-code module that grows too large is split into
//! `name.cod`, `name-1.cod`, `name-2.cod`, ...

use std::fmt;
use std::path::{Path, PathBuf};

/// Known artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Loadable binary code
    Cod,
    Jar,
    /// Application descriptor
    Jad,
    /// Generated build descriptor fed to the compiler
    Rapc,
    /// Debug symbols
    Debug,
    /// Signature list produced when protected APIs are referenced
    Csl,
    /// Signature list cache
    Cso,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Cod,
        ArtifactKind::Jar,
        ArtifactKind::Jad,
        ArtifactKind::Rapc,
        ArtifactKind::Debug,
        ArtifactKind::Csl,
        ArtifactKind::Cso,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Cod => "cod",
            ArtifactKind::Jar => "jar",
            ArtifactKind::Jad => "jad",
            ArtifactKind::Rapc => "rapc",
            ArtifactKind::Debug => "debug",
            ArtifactKind::Csl => "csl",
            ArtifactKind::Cso => "cso",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.extension().eq_ignore_ascii_case(ext))
    }

    /// Kind of the file at `path`, judged by its extension.
    pub fn of_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A build output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    pub base_name: String,
    pub kind: ArtifactKind,
    /// `None` for the first part, `Some(n)` for `-n`
    pub sibling: Option<u32>,
}

impl Artifact {
    pub fn new(base_name: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            base_name: base_name.into(),
            kind,
            sibling: None,
        }
    }

    pub fn sibling(base_name: impl Into<String>, kind: ArtifactKind, index: u32) -> Self {
        Self {
            base_name: base_name.into(),
            kind,
            sibling: if index == 0 { None } else { Some(index) },
        }
    }

    pub fn file_name(&self) -> String {
        match self.sibling {
            Some(index) => format!("{}-{}.{}", self.base_name, index, self.kind.extension()),
            None => format!("{}.{}", self.base_name, self.kind.extension()),
        }
    }

    /// Parses `name[-n].ext` for a known base name.
    pub fn parse(file_name: &str, base_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let kind = ArtifactKind::from_extension(ext)?;
        let rest = stem.strip_prefix(base_name)?;
        if rest.is_empty() {
            return Some(Self::new(base_name, kind));
        }
        let index = rest.strip_prefix('-')?.parse::<u32>().ok()?;
        Some(Self::sibling(base_name, kind, index))
    }
}

/// Returns `true` if `file_name` belongs to the artifact family of `base_name`:
/// `base.ext`, `base-N.ext` or `base_full.jad`.
///
/// `lib-net.cod` is not part of the `lib` family.
pub fn belongs_to(file_name: &str, base_name: &str) -> bool {
    Artifact::parse(file_name, base_name).is_some()
        || file_name.eq_ignore_ascii_case(&super::manifest::full_descriptor_name(base_name))
}

/// Enumerates `base.ext`, `base-1.ext`, `base-2.ext`, ... in `dir`, stopping at
/// the first missing index.
pub fn discover_siblings(dir: &Path, base_name: &str, kind: ArtifactKind) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut index = 0u32;
    loop {
        let path = dir.join(Artifact::sibling(base_name, kind, index).file_name());
        if !path.is_file() {
            break;
        }
        found.push(path);
        index += 1;
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_discovery_stops_at_first_gap() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["app.cod", "app-1.cod", "app-2.cod", "app-4.cod", "other.cod"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let siblings = discover_siblings(dir.path(), "app", ArtifactKind::Cod);
        assert_eq!(siblings.len(), 3);
        assert!(siblings[2].ends_with("app-2.cod"));
    }

    #[test]
    fn no_first_part_means_no_siblings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app-1.cod"), b"x").unwrap();
        assert!(discover_siblings(dir.path(), "app", ArtifactKind::Cod).is_empty());
    }

    #[test]
    fn parse_sibling_names() {
        assert_eq!(
            Artifact::parse("app-3.cod", "app"),
            Some(Artifact::sibling("app", ArtifactKind::Cod, 3))
        );
        assert_eq!(
            Artifact::parse("app.JAD", "app").map(|a| a.kind),
            Some(ArtifactKind::Jad)
        );
        assert_eq!(Artifact::parse("application.cod", "app"), None);
        assert_eq!(Artifact::parse("app.txt", "app"), None);
    }

    #[test]
    fn family_membership() {
        assert!(belongs_to("lib.cod", "lib"));
        assert!(belongs_to("lib-2.cod", "lib"));
        assert!(belongs_to("lib_full.jad", "lib"));
        assert!(!belongs_to("library.cod", "lib"));
        assert!(!belongs_to("lib-net.cod", "lib"));
        assert!(!belongs_to("lib-net_full.jad", "lib"));
        assert!(!belongs_to("lib_args.txt", "lib"));
    }
}
