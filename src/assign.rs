// the grammar of compound index lists lives in assign.pest
use pest::Parser;
use pest_derive::Parser;

use tracing::warn;

use crate::construct::{Item, ItemFlags, ItemState};
use crate::datatype::ItemType;
use crate::error::{ConfregError, Result};
use crate::numeric::{NumericKind, parse_number};
use crate::registry::Registry;

#[derive(Parser)]
#[grammar = "assign.pest"]
struct IndexListParser;

// ------------- Tokens -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Word<'t> {
    /// More input follows the word.
    More(&'t str),
    /// Nothing but blanks or a comment follows.
    Last(&'t str),
}

impl<'t> Word<'t> {
    pub(crate) fn text(&self) -> &'t str {
        match self {
            Word::More(w) | Word::Last(w) => w,
        }
    }
}

const BLANKS: [char; 4] = [' ', '\t', '\r', '\n'];

fn skip_blanks(text: &str, pos: usize) -> usize {
    let rest = &text[pos..];
    pos + (rest.len() - rest.trim_start_matches(BLANKS).len())
}

/// Extracts the next word, which ends at a blank, the separator or a `%`.
/// A separator directly following (blanks aside) is consumed with the word.
pub(crate) fn next_word<'t>(text: &'t str, pos: &mut usize, separator: char) -> Option<Word<'t>> {
    let start = skip_blanks(text, *pos);
    let rest = &text[start..];
    if rest.is_empty() || rest.starts_with('%') {
        *pos = text.len();
        return None;
    }
    let end = rest
        .find(|c: char| BLANKS.contains(&c) || c == separator || c == '%')
        .map_or(text.len(), |e| start + e);
    let word = &text[start..end];
    let mut after = skip_blanks(text, end);
    if text[after..].starts_with(separator) {
        after = skip_blanks(text, after + separator.len_utf8());
    }
    *pos = after;
    let tail = &text[after..];
    if tail.is_empty() || tail.starts_with('%') {
        Some(Word::Last(word))
    } else {
        Some(Word::More(word))
    }
}

/// Decodes backslash escapes and cuts the data at an unescaped `%` or line end.
pub(crate) fn preprocess(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut chars = data.trim_start_matches([' ', '\t']).chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                None | Some('\n') | Some('\r') | Some('0') => break,
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
            },
            '\n' | '\r' | '%' => break,
            _ => out.push(c),
        }
    }
    out.truncate(out.trim_end_matches([' ', '\t']).len());
    out
}

pub(crate) fn strip_quotes(text: &str) -> &str {
    let quoted = text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')));
    if quoted { &text[1..text.len() - 1] } else { text }
}

/// Resolves an index list like `1-4,7` or `all` into inclusive ranges within `count`.
pub(crate) fn parse_index_list(spec: &str, count: usize) -> std::result::Result<Vec<(usize, usize)>, String> {
    let invalid = || format!("Invalid index range '{}'", spec);
    let list = IndexListParser::parse(Rule::index_list, spec.trim())
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)?;
    let number = |text: &str| text.parse::<usize>().map_err(|_| invalid());
    let mut ranges = Vec::new();
    for entry in list.into_inner() {
        let (low, high) = match entry.as_rule() {
            Rule::index_all => (0, count.saturating_sub(1)),
            Rule::index_single => {
                let n = number(entry.as_str().trim())?;
                (n, n)
            }
            Rule::index_range => {
                let mut bounds = entry.into_inner();
                let low = number(bounds.next().ok_or_else(invalid)?.as_str())?;
                let high = number(bounds.next().ok_or_else(invalid)?.as_str())?;
                (low, high)
            }
            _ => continue,
        };
        if low > high {
            return Err(invalid());
        }
        if high >= count {
            return Err(format!("Index {} is out of range", high));
        }
        ranges.push((low, high));
    }
    Ok(ranges)
}

fn strip_verb<'t>(text: &'t str, verb: &str) -> Option<&'t str> {
    let head = text.get(..verb.len())?;
    if !head.eq_ignore_ascii_case(verb) {
        return None;
    }
    let rest = &text[verb.len()..];
    if rest.is_empty() || rest.starts_with([' ', '\t']) {
        Some(rest)
    } else {
        None
    }
}

// ------------- Statements -------------
/// Applies one statement on behalf of a session with the given default section.
///
/// A statement is `[SET ]name[:|=] value[, value...]`. Each value may carry an
/// index prefix: `idx:`, `lo-hi:`, `(a-b,c,...):` or `all:`. `n*value` repeats
/// a value from the running index, and unprefixed values continue after the
/// last element written. `[section]:` or `section:` alone selects the default
/// section instead.
pub(crate) fn apply_statement(
    registry: &Registry,
    default_section: &mut Option<String>,
    text: &str,
) -> Result<()> {
    let text = text.trim_start_matches([' ', '\t']);
    if let Some(rest) = strip_verb(text, "RESET") {
        warn!(arguments = rest.trim(), "Reset: Not yet implemented");
        return Ok(());
    }
    let text = match strip_verb(text, "SET") {
        Some(rest) if !rest.is_empty() => rest,
        _ => text,
    };
    let mut pos = 0;
    let Some(word) = next_word(text, &mut pos, '=') else {
        // empty or comment only
        return Ok(());
    };
    let keyword = word.text();
    if keyword.is_empty() {
        warn!("Invalid or missing configuration keyword");
        return Err(ConfregError::syntax("", "Invalid or missing configuration keyword"));
    }

    if let Word::Last(_) = word {
        let bracketed = keyword.starts_with('[') && keyword.ends_with(']');
        if keyword.ends_with(':') || bracketed {
            let name = keyword.strip_suffix(':').unwrap_or(keyword);
            let name = name
                .strip_prefix('[')
                .and_then(|n| n.strip_suffix(']'))
                .unwrap_or(name);
            return select_section(registry, default_section, name);
        }
    }

    let keyword = match word {
        Word::More(k) => k.strip_suffix(':').unwrap_or(k),
        Word::Last(k) => k,
    };
    let rest = &text[pos..];
    let item = resolve_item(registry, default_section.as_deref(), keyword)?;
    registry.record(&format!("{} {}", item.name(), rest))?;
    assign(registry, item, rest, default_section.as_deref())
}

/// Finds the unlocked item a keyword names, trying the default section first.
pub(crate) fn resolve_item<'r>(
    registry: &'r Registry,
    default_section: Option<&str>,
    keyword: &str,
) -> Result<&'r Item> {
    let qualified = match default_section {
        Some(section) if !keyword.contains(':') => {
            registry.lookup(&format!("{}:{}", section, keyword))
        }
        _ => None,
    };
    let Some(item) = qualified.or_else(|| registry.lookup(keyword)) else {
        warn!(item = keyword, "Unknown configuration item");
        return Err(ConfregError::UnknownItem(keyword.to_string()));
    };
    if item.is_locked() {
        warn!(item = keyword, "Configuration item is locked. Unlock before using it.");
        return Err(ConfregError::Locked(keyword.to_string()));
    }
    Ok(item)
}

/// Switches the default section of a session, as `[name]:` does.
pub(crate) fn select_section(
    registry: &Registry,
    default_section: &mut Option<String>,
    name: &str,
) -> Result<()> {
    if registry.has_section(name) {
        *default_section = Some(name.to_string());
        registry.record(&format!("[{}]:", name))?;
        return Ok(());
    }
    warn!(section = name, "No such section");
    *default_section = None;
    Err(ConfregError::UnknownSection(name.to_string()))
}

/// Applies the data part of a statement to a resolved item. Initial values
/// declared with the item take the same path.
pub(crate) fn assign(
    registry: &Registry,
    item: &Item,
    data: &str,
    default_section: Option<&str>,
) -> Result<()> {
    let flags = item.flags()?;
    if flags.contains(ItemFlags::REJECT_AFTER_INIT | ItemFlags::NOT_INITIAL) {
        warn!(item = item.name(), "Modification of configuration item rejected");
        return Err(ConfregError::Rejected(item.name().to_string()));
    }
    if let ItemType::External(id) = item.item_type() {
        let message = format!("Item is binary (type {}) and cannot be accessed in text mode", id);
        warn!(item = item.name(), "{}", message);
        return Err(ConfregError::syntax(item.name(), message));
    }
    let text = preprocess(data);
    match item.item_type() {
        ItemType::Function => {
            let _transaction = item.begin()?;
            item.call(registry, strip_quotes(&text), default_section)
        }
        ItemType::Text => {
            let mut value = strip_quotes(&text).to_string();
            let max = (item.size() as usize).saturating_sub(1);
            while value.len() > max {
                value.pop();
            }
            let _transaction = item.begin()?;
            let mut state = item.lock_state()?;
            state.stage(0, 0);
            state.values.set_text(&value);
            item.settle(registry, state, true, false, default_section)
        }
        item_type => {
            let Some(kind) = item_type.numeric_kind() else {
                return Err(ConfregError::syntax(item.name(), "Unsupported item type"));
            };
            let _transaction = item.begin()?;
            let mut state = item.lock_state()?;
            match assign_numbers(item, &mut state, &text, kind, flags.strict()) {
                Ok(full_range) => item.settle(registry, state, full_range, false, default_section),
                Err(e) => {
                    state.rollback(item.interface());
                    warn!(item = item.name(), error = %e, "Assignment abandoned");
                    Err(e)
                }
            }
        }
    }
}

/// Parses and stores all value tokens, returning whether the whole element
/// range was written by one index specification.
fn assign_numbers(
    item: &Item,
    state: &mut ItemState,
    text: &str,
    kind: NumericKind,
    strict: bool,
) -> Result<bool> {
    let name = item.name();
    let count = item.element_count();
    let syntax = |message: String| ConfregError::syntax(name, message);
    let mut pos = 0;
    let mut next = 0usize;
    let mut full_range = false;
    loop {
        pos = skip_blanks(text, pos);
        let mut ranges: Option<Vec<(usize, usize)>> = None;
        if text[pos..].starts_with('(') {
            let close = text[pos..]
                .find(')')
                .map(|c| pos + c)
                .filter(|&c| text[c + 1..].starts_with(':'))
                .ok_or_else(|| syntax("Wrong usage of parentheses".into()))?;
            ranges = Some(parse_index_list(&text[pos + 1..close], count).map_err(syntax)?);
            pos = close + 2;
        }
        let Some(word) = next_word(text, &mut pos, ',') else {
            if ranges.is_some() {
                return Err(syntax("Index list without value".into()));
            }
            break;
        };
        let mut value = word.text();
        if ranges.is_none() {
            if let Some((spec, rest)) = value.split_once(':') {
                ranges = Some(parse_index_list(spec, count).map_err(syntax)?);
                value = rest;
            } else if let Some((factor, rest)) = value.split_once('*') {
                let n = factor
                    .parse::<i64>()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| syntax("Invalid repetition factor".into()))?;
                ranges = Some(vec![(next, next + n as usize - 1)]);
                value = rest;
            }
        }
        if value.is_empty() {
            value = next_word(text, &mut pos, ',')
                .map(|w| w.text())
                .filter(|w| !w.is_empty())
                .ok_or_else(|| syntax("Missing value".into()))?;
        }

        let number = parse_number(kind, value).map_err(syntax)?;
        let number = item
            .bounds()
            .apply(name, number, strict)
            .map_err(|message| ConfregError::BoundViolation {
                item: name.to_string(),
                message,
            })?;
        let ranges = ranges.unwrap_or_else(|| vec![(next, next)]);
        for (low, high) in ranges {
            if high >= count {
                return Err(syntax(format!("Index {} is out of range", high)));
            }
            state.stage(low, high);
            for idx in low..=high {
                state.values.set_number(idx, number).map_err(syntax)?;
            }
            if low == 0 && high + 1 == count {
                full_range = true;
            }
            next = high + 1;
        }
    }
    Ok(full_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str, separator: char) -> Vec<Word<'_>> {
        let mut pos = 0;
        let mut out = Vec::new();
        while let Some(w) = next_word(text, &mut pos, separator) {
            out.push(w);
        }
        out
    }

    #[test]
    fn word_splitting() {
        assert_eq!(
            words("Foo = 1, 2 3 % comment", ','),
            vec![
                Word::More("Foo"),
                Word::More("="),
                Word::More("1"),
                Word::More("2"),
                Word::Last("3")
            ]
        );
        assert_eq!(words("Foo= 7", '='), vec![Word::More("Foo"), Word::Last("7")]);
        assert_eq!(words("[A]:", '='), vec![Word::Last("[A]:")]);
        assert!(words("   % only a comment", ',').is_empty());
    }

    #[test]
    fn escapes_and_comments() {
        assert_eq!(preprocess("  a\\tb % rest"), "a\tb");
        assert_eq!(preprocess("50\\% off"), "50% off");
        assert_eq!(preprocess("cut\\0here"), "cut");
        assert_eq!(preprocess("line\nnext"), "line");
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'x'"), "x");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[test]
    fn index_lists() {
        assert_eq!(parse_index_list("1-4,7", 10), Ok(vec![(1, 4), (7, 7)]));
        assert_eq!(parse_index_list(" 2 - 3 ", 10), Ok(vec![(2, 3)]));
        assert_eq!(parse_index_list("ALL", 4), Ok(vec![(0, 3)]));
        assert!(parse_index_list("4-1", 10).is_err());
        assert!(parse_index_list("3-10", 10).is_err());
        assert!(parse_index_list("-1", 10).is_err());
        assert!(parse_index_list("a", 10).is_err());
    }
}
