//! Operator-facing output.
//!
//! These are the short status lines the CLI prints for `start`, `stop`,
//! `reload` and `status`. They go to whatever writer the caller supplies
//! (stdout in the binary, a buffer in tests) and are kept apart from the
//! tracing logs on stderr.

use std::io::{self, Write};

/// Width of the label column in banner and status rows.
pub const LABEL_WIDTH: usize = 40;

const INFO: &str = "\x1b[1;36m";
const WARN: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Writes coloured status lines and padded rows.
pub struct Console<W: Write> {
    out: W,
    colour: bool,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out, colour: true }
    }

    /// Console without ANSI colour codes.
    pub fn plain(out: W) -> Self {
        Self { out, colour: false }
    }

    pub fn info(&mut self, message: &str) -> io::Result<()> {
        self.line(INFO, message)
    }

    pub fn warn(&mut self, message: &str) -> io::Result<()> {
        self.line(WARN, message)
    }

    /// One `label value` row with the label padded to [`LABEL_WIDTH`].
    pub fn row(&mut self, label: &str, value: &str) -> io::Result<()> {
        if self.colour {
            writeln!(
                self.out,
                "{INFO}{:<width$}{RESET}{}",
                label,
                value,
                width = LABEL_WIDTH
            )
        } else {
            writeln!(self.out, "{:<width$}{}", label, value, width = LABEL_WIDTH)
        }
    }

    pub fn rows<I, L, V>(&mut self, rows: I) -> io::Result<()>
    where
        I: IntoIterator<Item = (L, V)>,
        L: AsRef<str>,
        V: AsRef<str>,
    {
        for (label, value) in rows {
            self.row(label.as_ref(), value.as_ref())?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, colour: &str, message: &str) -> io::Result<()> {
        if self.colour {
            writeln!(self.out, "{colour}{message}{RESET}")?;
        } else {
            writeln!(self.out, "{message}")?;
        }
        self.out.flush()
    }
}
