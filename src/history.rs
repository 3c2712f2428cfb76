// used for the timestamps of recorded assignments
use chrono::{DateTime, Utc};

use std::fmt;

/// One recorded assignment or section directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub text: String,
    pub recorded: DateTime<Utc>,
    /// 0 while the configuration is being initialized, 1 afterwards.
    pub level: u8,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.recorded.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.text
        )
    }
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or("")
}

/// Assignments in the order they were made. During initialization a new
/// entry replaces an older one for the same item, so the log holds the
/// effective initial configuration followed by every later change.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, text: &str, level: u8) {
        let entry = HistoryEntry {
            text: text.trim().to_string(),
            recorded: Utc::now(),
            level,
        };
        if level == 0 {
            let word = first_word(&entry.text);
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|e| e.level == 0 && first_word(&e.text).eq_ignore_ascii_case(word))
            {
                *existing = entry;
                return;
            }
        }
        self.entries.push(entry);
    }
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_entries_are_replaced() {
        let mut history = History::new();
        history.push("Foo 1", 0);
        history.push("Bar 2", 0);
        history.push("foo 3", 0);
        assert_eq!(history.len(), 2);
        assert_eq!(history.entries()[0].text, "foo 3");
        history.push("Foo 4", 1);
        history.push("Foo 5", 1);
        assert_eq!(history.len(), 4);
        assert_eq!(history.entries()[3].level, 1);
    }
}
