//! Descriptor (`.jad`) parsing, merging and generation.
//!
//! A descriptor is a line oriented `Key: value` file. Binary-code entries are
//! spread over four keys sharing an index suffix:
//!
//! ```text
//! RIM-COD-URL: app.cod
//! RIM-COD-Size: 6012
//! RIM-COD-SHA1: 5e 2b ...
//! RIM-COD-Creation-Time: 1262304000
//! RIM-COD-URL-1: app-1.cod
//! ...
//! ```
//!
//! Every other line is kept verbatim and in order.

use super::artifact::{self, ArtifactKind};
use super::checksum::descriptor_sha1;
use super::error::{ErrorExt, Result};
use super::project::Project;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::UNIX_EPOCH;

/// Prefix shared by the binary-code entry keys.
pub const COD_KEY_PREFIX: &str = "RIM-COD-";
/// Suffix appended to the file name of a merged descriptor.
pub const FULL_DESCRIPTOR_SUFFIX: &str = "_full";

static COD_ENTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^RIM-COD-(URL|Size|SHA1|Creation-Time)(?:-(\d+))?\s*:\s*(.*)$")
        .expect("static regex")
});

/// One binary-code entry of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodEntry {
    pub index: u32,
    pub url: Option<String>,
    pub size: Option<String>,
    pub sha1: Option<String>,
    pub creation_time: Option<String>,
}

impl CodEntry {
    /// Builds an entry describing the file at `path`.
    pub fn from_file(index: u32, path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path).fs_context("reading artifact metadata", path)?;
        let created = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let url = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            index,
            url: Some(url),
            size: Some(metadata.len().to_string()),
            sha1: Some(descriptor_sha1(path)?),
            creation_time: Some(created.to_string()),
        })
    }

    fn set(&mut self, key: &str, value: String) {
        match key {
            "URL" => self.url = Some(value),
            "Size" => self.size = Some(value),
            "SHA1" => self.sha1 = Some(value),
            _ => self.creation_time = Some(value),
        }
    }

    fn key(&self, name: &str) -> String {
        if self.index == 0 {
            format!("{COD_KEY_PREFIX}{name}")
        } else {
            format!("{COD_KEY_PREFIX}{name}-{}", self.index)
        }
    }
}

/// Parsed descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    others: Vec<String>,
    entries: BTreeMap<u32, CodEntry>,
    crlf: bool,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses descriptor text. Lines that are not binary-code entries,
    /// blank ones included, are kept verbatim.
    pub fn parse(content: &str) -> Self {
        let mut descriptor = Self {
            crlf: content.contains("\r\n"),
            ..Default::default()
        };

        for line in content.lines() {
            match COD_ENTRY_LINE.captures(line) {
                Some(caps) => {
                    let key = &caps[1];
                    let index = caps
                        .get(2)
                        .and_then(|m| m.as_str().parse::<u32>().ok())
                        .unwrap_or(0);
                    let value = caps[3].to_string();
                    descriptor
                        .entries
                        .entry(index)
                        .or_insert_with(|| CodEntry {
                            index,
                            ..Default::default()
                        })
                        .set(key, value);
                }
                None => descriptor.others.push(line.to_string()),
            }
        }

        descriptor
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).fs_context("reading descriptor", path)?;
        Ok(Self::parse(&content))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).fs_context("creating descriptor directory", parent)?;
        }
        std::fs::write(path, self.serialize()).fs_context("writing descriptor", path)
    }

    /// Lines that are not binary-code entries, in original order.
    pub fn other_properties(&self) -> &[String] {
        &self.others
    }

    /// Entries ordered by index.
    pub fn entries(&self) -> impl Iterator<Item = &CodEntry> {
        self.entries.values()
    }

    pub fn entry(&self, index: u32) -> Option<&CodEntry> {
        self.entries.get(&index)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Value of a non-entry property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.others.iter().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            (k.trim() == key).then(|| v.trim())
        })
    }

    /// Sets a non-entry property, replacing an existing line with the same key.
    pub fn set_property(&mut self, key: &str, value: &str) {
        let line = format!("{key}: {value}");
        let existing = self.others.iter().position(|l| {
            l.split_once(':')
                .map(|(k, _)| k.trim() == key)
                .unwrap_or(false)
        });
        match existing {
            Some(pos) => self.others[pos] = line,
            None => self.others.push(line),
        }
    }

    /// Appends an entry after the highest existing index.
    pub fn push_entry(&mut self, mut entry: CodEntry) {
        entry.index = self.next_index();
        self.entries.insert(entry.index, entry);
    }

    /// Appends the entries of `other`, renumbered to continue after the
    /// highest existing index. Entries whose URL is already listed are skipped.
    pub fn add_cod_entries(&mut self, other: &Descriptor) {
        self.add_entries_with(other, |url| url.to_string());
    }

    /// Like [`add_cod_entries`](Self::add_cod_entries), rewriting each URL to
    /// `../<folder>/<url>`.
    pub fn add_relocated_cod_entries(&mut self, other: &Descriptor, folder: &str) {
        self.add_entries_with(other, |url| format!("../{folder}/{url}"));
    }

    fn add_entries_with(&mut self, other: &Descriptor, rewrite: impl Fn(&str) -> String) {
        for entry in other.entries() {
            let mut entry = entry.clone();
            entry.url = entry.url.as_deref().map(&rewrite);
            let duplicate = entry.url.is_some()
                && self.entries.values().any(|e| e.url == entry.url);
            if duplicate {
                log::debug!("skipping duplicate descriptor entry {:?}", entry.url);
                continue;
            }
            self.push_entry(entry);
        }
    }

    fn next_index(&self) -> u32 {
        self.entries
            .keys()
            .next_back()
            .map(|last| last + 1)
            .unwrap_or(0)
    }

    /// Other properties first, then one block per entry.
    pub fn serialize(&self) -> String {
        let newline = if self.crlf { "\r\n" } else { "\n" };
        let mut out = String::new();
        for line in &self.others {
            out.push_str(line);
            out.push_str(newline);
        }
        for entry in self.entries.values() {
            let fields = [
                ("URL", &entry.url),
                ("Size", &entry.size),
                ("SHA1", &entry.sha1),
                ("Creation-Time", &entry.creation_time),
            ];
            for (name, value) in fields {
                if let Some(value) = value {
                    out.push_str(&entry.key(name));
                    out.push_str(": ");
                    out.push_str(value);
                    out.push_str(newline);
                }
            }
        }
        out
    }
}

/// File name of the merged descriptor for `base_name`.
pub fn full_descriptor_name(base_name: &str) -> String {
    format!(
        "{base_name}{FULL_DESCRIPTOR_SUFFIX}.{}",
        ArtifactKind::Jad.extension()
    )
}

/// Generates a descriptor for the binary-code siblings of `project` found in
/// its standard output folder.
pub fn generate_descriptor(project: &Project) -> Result<Descriptor> {
    let dir = project.standard_dir();
    let cods = artifact::discover_siblings(&dir, project.base_name(), ArtifactKind::Cod);
    if cods.is_empty() {
        return Err(super::Error::GenericError(format!(
            "cannot generate descriptor for `{}`: no {}.cod in {}",
            project.name(),
            project.base_name(),
            dir.display()
        )));
    }

    let mut descriptor = Descriptor::new();
    descriptor.set_property("Manifest-Version", "1.0");
    descriptor.set_property("MIDlet-Name", project.name());
    for (key, value) in project.properties() {
        descriptor.set_property(key, value);
    }
    descriptor.set_property("RIM-COD-Module-Name", project.base_name());

    for (index, cod) in cods.iter().enumerate() {
        descriptor.push_entry(CodEntry::from_file(index as u32, cod)?);
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Manifest-Version: 1.0
MIDlet-Name: Hello
RIM-COD-Module-Name: hello
RIM-COD-URL: hello.cod
RIM-COD-Size: 120
RIM-COD-SHA1: aa bb
RIM-COD-Creation-Time: 1262304000
MIDlet-Vendor: Acme
RIM-COD-URL-1: hello-1.cod
RIM-COD-Size-1: 64
RIM-COD-SHA1-1: cc dd
RIM-COD-Creation-Time-1: 1262304001
";

    #[test]
    fn parse_groups_entries_by_index() {
        let d = Descriptor::parse(SAMPLE);
        assert_eq!(d.entry_count(), 2);
        let second = d.entry(1).unwrap();
        assert_eq!(second.url.as_deref(), Some("hello-1.cod"));
        assert_eq!(second.size.as_deref(), Some("64"));
        assert_eq!(
            d.other_properties(),
            [
                "Manifest-Version: 1.0",
                "MIDlet-Name: Hello",
                "RIM-COD-Module-Name: hello",
                "MIDlet-Vendor: Acme"
            ]
        );
        assert_eq!(d.property("MIDlet-Vendor"), Some("Acme"));
    }

    #[test]
    fn round_trip_keeps_entries_and_unknown_lines() {
        let first = Descriptor::parse(SAMPLE);
        let second = Descriptor::parse(&first.serialize());
        assert_eq!(first, second);
        assert!(first.serialize().contains("RIM-COD-URL: hello.cod\n"));
        assert!(first.serialize().contains("RIM-COD-URL-1: hello-1.cod\n"));
    }

    #[test]
    fn crlf_line_endings_are_preserved() {
        let d = Descriptor::parse("A: 1\r\nRIM-COD-URL: x.cod\r\n");
        assert_eq!(d.serialize(), "A: 1\r\nRIM-COD-URL: x.cod\r\n");
    }

    #[test]
    fn merged_entries_continue_numbering() {
        let mut main = Descriptor::parse(SAMPLE);
        let lib = Descriptor::parse("RIM-COD-URL: lib.cod\nRIM-COD-Size: 9\nRIM-COD-URL-1: lib-1.cod\n");
        main.add_cod_entries(&lib);

        assert_eq!(main.entry_count(), 4);
        assert_eq!(main.entry(2).unwrap().url.as_deref(), Some("lib.cod"));
        assert_eq!(main.entry(3).unwrap().url.as_deref(), Some("lib-1.cod"));
        assert!(main.serialize().contains("RIM-COD-Size-2: 9"));

        // merging again does not duplicate
        main.add_cod_entries(&lib);
        assert_eq!(main.entry_count(), 4);
    }

    #[test]
    fn relocated_entries_point_into_version_folder() {
        let mut main = Descriptor::new();
        main.add_relocated_cod_entries(&Descriptor::parse("RIM-COD-URL: lib.cod\n"), "4.5.0");
        assert_eq!(main.entry(0).unwrap().url.as_deref(), Some("../4.5.0/lib.cod"));
    }

    #[test]
    fn blank_separators_pass_through() {
        let text = "MIDlet-Name: Hello\n\nMIDlet-Vendor: Acme\n\nRIM-COD-URL: hello.cod\n";
        let d = Descriptor::parse(text);
        assert_eq!(
            d.other_properties(),
            ["MIDlet-Name: Hello", "", "MIDlet-Vendor: Acme", ""]
        );
        assert_eq!(d.serialize(), text);
    }

    #[test]
    fn set_property_replaces_in_place() {
        let mut d = Descriptor::parse("A: 1\nB: 2\n");
        d.set_property("A", "3");
        assert_eq!(d.other_properties(), ["A: 3", "B: 2"]);
    }
}
