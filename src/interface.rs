//! Caller-facing side of the registry: sessions, line sources and output sinks.
//!
//! A [`Session`] is the per-caller context through which assignments are
//! applied. It carries the default section selected by `[section]:`
//! directives, so threads that each hold their own session can navigate
//! different sections at the same time without interfering.
//!
//! Configuration input is pulled through a [`LineSource`]. Any
//! `FnMut() -> Option<String>` closure is one; [`ReaderSource`] adapts a
//! `BufRead` and splits physical lines into `;`-separated statements.
//!
//! Output of the introspection commands goes to an [`OutputSink`] owned by
//! the registry, standard output unless replaced with e.g. a [`BufferSink`].

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::assign;
use crate::binary;
use crate::error::{ConfregError, Result};
use crate::registry::Registry;

// ------------- Statements -------------
/// Splits one physical line into statements at every `;` outside quotes.
/// An unquoted `%` starts a comment, which stays with the last statement.
pub fn split_statements(line: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' | '\'' if quote.is_none() => {
                quote = Some(c);
                current.push(c);
            }
            c if quote == Some(c) => {
                quote = None;
                current.push(c);
            }
            ';' if quote.is_none() => {
                statements.push(std::mem::take(&mut current));
            }
            '%' if quote.is_none() => {
                current.push(c);
                current.extend(chars.by_ref());
            }
            _ => current.push(c),
        }
    }
    statements.push(current);
    statements
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ------------- Line sources -------------
/// Successive configuration statements, `None` at end of input.
pub trait LineSource {
    fn next_line(&mut self) -> Option<String>;
}

impl<F> LineSource for F
where
    F: FnMut() -> Option<String>,
{
    fn next_line(&mut self) -> Option<String> {
        self()
    }
}

/// Reads statements from any buffered reader. Lines pushed onto its stack
/// are served first, most recently pushed first.
pub struct ReaderSource<R: BufRead> {
    reader: Option<R>,
    stack: Vec<String>,
    pending: VecDeque<String>,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            stack: Vec::new(),
            pending: VecDeque::new(),
        }
    }
    pub fn push(&mut self, line: &str) -> &mut Self {
        self.stack.push(line.to_string());
        self
    }
    fn physical_line(&mut self) -> Option<String> {
        if let Some(line) = self.stack.pop() {
            return Some(line);
        }
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(_) => Some(line),
            Err(e) => {
                warn!(error = %e, "Configuration input ended by read error");
                self.reader = None;
                None
            }
        }
    }
}

impl<R: BufRead> LineSource for ReaderSource<R> {
    fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(statement) = self.pending.pop_front() {
                return Some(statement);
            }
            let line = self.physical_line()?;
            self.pending.extend(split_statements(&line));
        }
    }
}

// ------------- Output -------------
pub trait OutputSink: Send {
    fn write_text(&mut self, text: &str);
}

#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_text(&mut self, text: &str) {
        print!("{}", text);
    }
}

/// Collects output into a shared string; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferSink(Arc<Mutex<String>>);

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn contents(&self) -> String {
        self.0.lock().map(|b| b.clone()).unwrap_or_default()
    }
    pub fn take(&self) -> String {
        self.0
            .lock()
            .map(|mut b| std::mem::take(&mut *b))
            .unwrap_or_default()
    }
}

impl OutputSink for BufferSink {
    fn write_text(&mut self, text: &str) {
        if let Ok(mut buffer) = self.0.lock() {
            buffer.push_str(text);
        }
    }
}

// ------------- Sessions -------------
/// Per-caller assignment context.
pub struct Session<'r> {
    registry: &'r Registry,
    default_section: Option<String>,
}

impl<'r> Session<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            default_section: None,
        }
    }
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }
    pub fn default_section(&self) -> Option<&str> {
        self.default_section.as_deref()
    }
    pub fn set_default_section(&mut self, section: Option<&str>) -> Result<()> {
        match section {
            Some(name) if !self.registry.has_section(name) => {
                self.default_section = None;
                Err(ConfregError::UnknownSection(name.to_string()))
            }
            _ => {
                self.default_section = section.map(str::to_string);
                Ok(())
            }
        }
    }

    /// Applies one assignment statement.
    pub fn apply_text(&mut self, text: &str) -> Result<()> {
        self.registry.ensure_usable()?;
        assign::apply_statement(self.registry, &mut self.default_section, text)
    }

    /// Applies every `;`-separated statement of a line, reporting the first failure.
    pub fn apply_line(&mut self, line: &str) -> Result<()> {
        let mut outcome = Ok(());
        for statement in split_statements(line) {
            let result = self.apply_text(&statement);
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }

    /// Applies one binary configuration buffer.
    pub fn apply_binary(&mut self, buffer: &[u8]) -> Result<()> {
        self.registry.ensure_usable()?;
        binary::apply_binary(self.registry, &mut self.default_section, buffer)
    }

    /// Feeds the whole source through [`Session::apply_line`], collecting failures.
    pub fn pull(&mut self, source: &mut dyn LineSource) -> Vec<ConfregError> {
        let mut failures = Vec::new();
        while let Some(line) = source.next_line() {
            if let Err(e) = self.apply_line(&line) {
                failures.push(e);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn statements_split_outside_quotes() {
        assert_eq!(split_statements("A 1; B 2"), vec!["A 1", "B 2"]);
        assert_eq!(
            split_statements("Name \"a;b\"; C 3"),
            vec!["Name \"a;b\"", "C 3"]
        );
        assert_eq!(split_statements("A 1 % x; y"), vec!["A 1 % x; y"]);
        assert_eq!(split_statements("A 'it\\'s;' ; B"), vec!["A 'it\\'s;'", "B"]);
        assert!(split_statements("  ;  ").is_empty());
    }

    #[test]
    fn reader_source_serves_stack_first() {
        let mut source = ReaderSource::new(Cursor::new("A 1; B 2\nC 3\n"));
        source.push("Z 0");
        let mut seen = Vec::new();
        while let Some(line) = source.next_line() {
            seen.push(line);
        }
        assert_eq!(seen, vec!["Z 0", "A 1", "B 2", "C 3"]);
    }

    #[test]
    fn buffer_sink_shares_contents() {
        let sink = BufferSink::new();
        let mut writer = sink.clone();
        writer.write_text("hello ");
        writer.write_text("world");
        assert_eq!(sink.contents(), "hello world");
        assert_eq!(sink.take(), "hello world");
        assert_eq!(sink.contents(), "");
    }
}
