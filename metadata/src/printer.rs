//! Printer module - formats introspection output as a text table.

use std::{
    borrow::Cow,
    fs,
    io::{self, Write},
    path::Path,
};

use crate::consts::OUTPUT_FILE_NAME;

/// Line oriented destination for introspection output.
pub trait ReportSink {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

impl ReportSink for Vec<String> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.push(line.into());
        Ok(())
    }
}

/// Sink appending lines to `{db_dir}/{OUTPUT_FILE_NAME}`.
pub struct OutputFile {
    file: fs::File,
}

impl OutputFile {
    /// Opens the output file of the database in `db_dir`, creating it when missing.
    pub fn open(db_dir: impl AsRef<Path>) -> io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_dir.as_ref().join(OUTPUT_FILE_NAME))?;
        Ok(OutputFile { file })
    }
}

impl ReportSink for OutputFile {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{line}")
    }
}

/// Width of a single column, longer values are truncated.
const COLUMN_WIDTH: usize = 16;

/// Prints rows of a fixed number of columns:
///
/// ```text
/// +------------------+------------------+
/// |            Field |             Type |
/// +------------------+------------------+
/// ```
pub struct RecordPrinter {
    column_count: usize,
}

impl RecordPrinter {
    pub fn new(column_count: usize) -> Self {
        RecordPrinter { column_count }
    }

    pub fn print_separator(&self, sink: &mut dyn ReportSink) -> io::Result<()> {
        let cell = format!("{}+", "-".repeat(COLUMN_WIDTH + 2));
        sink.write_line(&format!("+{}", cell.repeat(self.column_count)))
    }

    /// Prints a single row. Missing fields are printed empty, fields past `column_count` are ignored.
    pub fn print_record<S: AsRef<str>>(
        &self,
        fields: &[S],
        sink: &mut dyn ReportSink,
    ) -> io::Result<()> {
        let mut line = String::from("|");
        for idx in 0..self.column_count {
            let field = fields.get(idx).map(|f| f.as_ref()).unwrap_or("");
            line.push_str(&format!(" {:>width$} |", fit(field), width = COLUMN_WIDTH));
        }
        sink.write_line(&line)
    }
}

fn fit(field: &str) -> Cow<'_, str> {
    if field.chars().count() <= COLUMN_WIDTH {
        return Cow::Borrowed(field);
    }
    let mut truncated: String = field.chars().take(COLUMN_WIDTH - 3).collect();
    truncated.push_str("...");
    Cow::Owned(truncated)
}
