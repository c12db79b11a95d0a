//! Loader tool used for wired device deployment.

use crate::bail;
use crate::packager::error::{Error, Result};
use regex::Regex;
use semver::Version;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

/// Oldest loader tool that understands the commands used here.
pub const MINIMUM_LOADER_VERSION: Version = Version::new(4, 2, 0);

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("static regex"));
static PIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(0x)?([0-9a-f]{8})\b").expect("static regex"));

/// Device loader operations. Calls block; run them off the async runtime.
pub trait LoaderTool: Send + Sync {
    fn version(&self) -> Result<Version>;

    /// Identifiers of the connected devices.
    fn connections(&self) -> Result<Vec<String>>;

    /// Arguments selecting and authenticating against `device`.
    ///
    /// `None` means the user declined to authenticate.
    fn connection_options(&self, device: &str) -> Result<Option<Vec<String>>>;

    /// Runs `<loader> <options...> load <artifact>`.
    fn load(&self, options: &[String], artifact: &Path) -> Result<()>;
}

/// Parses the first `major.minor[.patch]` found in `text`.
pub fn parse_version(text: &str) -> Result<Version> {
    let caps = VERSION
        .captures(text)
        .ok_or_else(|| Error::UnknownLoaderVersion(text.trim().to_string()))?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    Ok(Version::new(part(1), part(2), part(3)))
}

/// Device PINs listed in loader output, in order, without duplicates.
pub fn parse_connections(text: &str) -> Vec<String> {
    let mut pins: Vec<String> = Vec::new();
    for caps in PIN.captures_iter(text) {
        let pin = format!("0x{}", caps[2].to_ascii_uppercase());
        if !pins.contains(&pin) {
            pins.push(pin);
        }
    }
    pins
}

/// [`LoaderTool`] backed by the external loader executable.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    path: PathBuf,
    password: Option<String>,
}

impl ProcessLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            password: None,
        }
    }

    /// Device password passed with `-w`.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        log::debug!("{} {}", self.path.display(), args.join(" "));
        Command::new(&self.path)
            .args(args)
            .output()
            .map_err(|error| Error::CommandFailed {
                command: format!("{} {}", self.path.display(), args.join(" ")),
                error,
            })
    }
}

impl LoaderTool for ProcessLoader {
    fn version(&self) -> Result<Version> {
        let output = self.run(&["-version"])?;
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        parse_version(&text)
    }

    fn connections(&self) -> Result<Vec<String>> {
        let output = self.run(&["enum"])?;
        Ok(parse_connections(&String::from_utf8_lossy(&output.stdout)))
    }

    fn connection_options(&self, device: &str) -> Result<Option<Vec<String>>> {
        let mut options = vec!["-u".to_string(), format!("-p{device}")];
        if let Some(password) = &self.password {
            options.push(format!("-w{password}"));
        }
        Ok(Some(options))
    }

    fn load(&self, options: &[String], artifact: &Path) -> Result<()> {
        let artifact_arg = artifact.to_string_lossy();
        let mut args: Vec<&str> = options.iter().map(String::as_str).collect();
        args.push("load");
        args.push(&artifact_arg);

        let output = self.run(&args)?;
        if !output.status.success() {
            bail!(
                "loading {} failed ({}): {}",
                artifact.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
