//! Terminal output for the command line tool.
//!
//! Progress goes to stdout, warnings and errors to stderr. `--quiet`
//! silences everything except errors. Status tags are coloured when the
//! stream is a terminal and `NO_COLOR` is unset.

use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Debug, Clone, Copy)]
pub struct OutputManager {
    verbose: bool,
    quiet: bool,
    color: ColorChoice,
}

impl OutputManager {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let color = if std::env::var_os("NO_COLOR").is_some() {
            ColorChoice::Never
        } else {
            ColorChoice::Auto
        };
        Self {
            verbose,
            quiet,
            color,
        }
    }

    pub fn progress(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        write_tagged(&mut self.stdout(), "==>", Color::Cyan, message)
    }

    pub fn success(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        write_tagged(&mut self.stdout(), "ok:", Color::Green, message)
    }

    pub fn section(&self, title: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut out = self.stdout();
        writeln!(out)?;
        out.set_color(ColorSpec::new().set_bold(true))?;
        write!(out, "{title}")?;
        out.reset()?;
        writeln!(out, "\n{}", "-".repeat(title.len()))
    }

    pub fn indent(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(self.stdout(), "    {message}")
    }

    /// Only printed with `--verbose`.
    pub fn verbose(&self, message: &str) -> io::Result<()> {
        if !self.verbose {
            return Ok(());
        }
        self.indent(message)
    }

    pub fn warn(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        write_tagged(&mut self.stderr(), "warning:", Color::Yellow, message)
    }

    pub fn error(&self, message: &str) -> io::Result<()> {
        write_tagged(&mut self.stderr(), "error:", Color::Red, message)
    }

    fn stdout(&self) -> StandardStream {
        StandardStream::stdout(self.color)
    }

    fn stderr(&self) -> StandardStream {
        StandardStream::stderr(self.color)
    }
}

/// Writes `<tag> <message>` with the tag in bold `color`.
fn write_tagged(w: &mut impl WriteColor, tag: &str, color: Color, message: &str) -> io::Result<()> {
    w.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(w, "{tag}")?;
    w.reset()?;
    writeln!(w, " {message}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use termcolor::Buffer;

    #[test]
    fn tags_are_plain_without_color() {
        let mut buffer = Buffer::no_color();
        write_tagged(&mut buffer, "error:", Color::Red, "core: failed").unwrap();
        assert_eq!(String::from_utf8_lossy(buffer.as_slice()), "error: core: failed\n");
    }

    #[test]
    fn tags_are_coloured_on_ansi_terminals() {
        let mut buffer = Buffer::ansi();
        write_tagged(&mut buffer, "ok:", Color::Green, "core: packaged").unwrap();
        let text = String::from_utf8_lossy(buffer.as_slice()).into_owned();
        assert!(text.starts_with("\x1b["));
        assert!(text.contains("32m"));
        assert!(text.contains("ok:"));
        assert!(text.ends_with(" core: packaged\n"));
    }
}
