// built-in pseudo-items of the _internal_ section

use std::fmt::Write;

use serde_json::json;
use tracing::{error, warn};

use crate::construct::{Invocation, Item, ItemDef, ItemFlags, callback};
use crate::datatype::{ItemType, Values};
use crate::numeric::{Number, NumericKind};
use crate::registry::{INTERNAL_SECTION, Registry};

// values beyond this many elements are elided by SHOW
const SHOW_ELEMENTS: usize = 8;

/// How `LIST` renders its assignment statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListStyle {
    #[default]
    Plain,
    Latex,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFormat {
    pub style: ListStyle,
    /// Put in front of every listed line.
    pub prefix: String,
}

pub(crate) fn internal_items() -> Vec<ItemDef> {
    vec![
        ItemDef::function("SHOW", callback(show)),
        ItemDef::function("LOCK", callback(|inv| set_locks(inv, true))),
        ItemDef::function("UNLOCK", callback(|inv| set_locks(inv, false))),
        ItemDef::function("LIMITS", callback(limits)),
        ItemDef::function("STATUS", callback(status)),
        ItemDef::function("LIST", callback(list)),
        ItemDef::function("GET", callback(get)),
        ItemDef::function("ECHO", callback(|inv| emit(inv.registry, &format!("{}\n", argument(inv))))),
        ItemDef::function(
            "WARNING",
            callback(|inv| {
                warn!(text = argument(inv), "Configuration warning");
                Ok(())
            }),
        ),
        ItemDef::function(
            "ERROR",
            callback(|inv| {
                let message = argument(inv);
                error!(text = message, "Configuration error");
                Err(message.to_string())
            }),
        ),
    ]
}

fn argument<'a>(inv: &Invocation<'a>) -> &'a str {
    inv.text.unwrap_or("").trim()
}

fn emit(registry: &Registry, text: &str) -> Result<(), String> {
    registry.emit(text).map_err(|e| e.to_string())
}

// ------------- Selection -------------
/// Resolves a command argument: nothing, `*` or `all` for every registrant
/// item, `[section]` or a section name, or a single item name.
fn select<'r>(registry: &'r Registry, selector: &str, default_section: Option<&str>) -> Result<Vec<&'r Item>, String> {
    let selector = selector.trim();
    if selector.is_empty() || selector == "*" || selector.eq_ignore_ascii_case("all") {
        return Ok(registry.items().filter(|i| !i.is_internal()).collect());
    }
    let bracketed = selector.strip_prefix('[').and_then(|s| s.strip_suffix(']'));
    if let Some(block) = registry.section(bracketed.unwrap_or(selector)) {
        return Ok(block.items().iter().collect());
    }
    if bracketed.is_some() {
        return Err(format!("No such section: {}", selector));
    }
    let qualified = match default_section {
        Some(section) if !selector.contains(':') => registry.lookup(&format!("{}:{}", section, selector)),
        _ => None,
    };
    qualified
        .or_else(|| registry.lookup(selector))
        .map(|item| vec![item])
        .ok_or_else(|| format!("Unknown configuration item '{}'", selector))
}

// ------------- Rendering -------------
fn render(values: &Values, item: &Item, limit: Option<usize>) -> String {
    let hex = item.item_type().numeric_kind() == Some(NumericKind::Hex);
    match item.item_type() {
        ItemType::Function => String::new(),
        ItemType::Text => format!("\"{}\"", values.text().unwrap_or("")),
        item_type => {
            let count = item.element_count();
            let shown = limit.map_or(count, |l| count.min(l));
            let mut out: Vec<String> = (0..shown)
                .map(|idx| match (item_type, item.interface()) {
                    (ItemType::External(_), Some(bi)) => {
                        values.element_bytes(idx).map(|e| bi.describe(e)).unwrap_or_default()
                    }
                    _ => values.display(idx, hex),
                })
                .collect();
            if shown < count {
                out.push("...".into());
            }
            out.join(",")
        }
    }
}

fn markers(item: &Item) -> String {
    let mut marks = String::new();
    if item.is_locked() {
        marks.push('#');
    }
    if item.has_callback() || item.declared_flags().contains(ItemFlags::REJECT_AFTER_INIT) {
        marks.push('*');
    }
    marks
}

// ------------- Commands -------------
fn show(inv: &Invocation) -> Result<(), String> {
    let items = select(inv.registry, argument(inv), inv.default_section)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<3}{:<24}{:<12}{:>6}  {:<12}{:<12}{:<16}{}",
        "", "Item", "Type", "Size", "Lower", "Upper", "Initial", "Value"
    );
    for item in items {
        let values = item.values().map_err(|e| e.to_string())?;
        let _ = writeln!(
            out,
            "{:<3}{:<24}{:<12}{:>6}  {:<12}{:<12}{:<16}{}",
            markers(item),
            item.qualified_name(),
            item.item_type().name(),
            item.size(),
            item.lower().unwrap_or("-"),
            item.upper().unwrap_or("-"),
            item.initial().unwrap_or("-"),
            render(&values, item, Some(SHOW_ELEMENTS))
        );
    }
    emit(inv.registry, &out)
}

fn set_locks(inv: &Invocation, locked: bool) -> Result<(), String> {
    let selector = argument(inv);
    let items = select(inv.registry, selector, inv.default_section)?;
    let every = selector.is_empty() || selector == "*" || selector.eq_ignore_ascii_case("all");
    if !every && items.iter().any(|i| i.is_internal()) {
        warn!(selector, "Items of section {} cannot be locked or unlocked", INTERNAL_SECTION);
        return Err(format!("Items of section {} cannot be locked or unlocked", INTERNAL_SECTION));
    }
    for item in items.into_iter().filter(|i| !i.is_internal()) {
        item.set_locked(locked);
    }
    Ok(())
}

fn status(inv: &Invocation) -> Result<(), String> {
    let items = select(inv.registry, argument(inv), inv.default_section)?;
    let mut out = String::new();
    for item in items {
        let state = if item.is_locked() { "locked" } else { "unlocked" };
        let _ = writeln!(out, "{} is {}.", item.qualified_name(), state);
    }
    emit(inv.registry, &out)
}

fn limits(inv: &Invocation) -> Result<(), String> {
    let items = select(inv.registry, argument(inv), inv.default_section)?;
    let mut out = String::new();
    for item in items.into_iter().filter(|i| i.item_type().is_numeric()) {
        let bounds = item.bounds();
        if bounds.is_empty() {
            let _ = writeln!(out, "{}: no limits", item.qualified_name());
            continue;
        }
        let bound = |b: Option<Number>| b.map_or("-".to_string(), |n| n.to_string());
        let strict = if item.declared_flags().strict() { " (strict)" } else { "" };
        let _ = writeln!(
            out,
            "{}: {} .. {}{}",
            item.qualified_name(),
            bound(bounds.lower),
            bound(bounds.upper),
            strict
        );
    }
    emit(inv.registry, &out)
}

/// Accepts a filter (`locked`, `unlocked`, `modified` or a selector as for
/// SHOW) and prints assignment statements that reproduce the current values.
fn list(inv: &Invocation) -> Result<(), String> {
    let filter = argument(inv);
    let wanted = |item: &Item| -> Result<bool, String> {
        Ok(match filter.to_ascii_lowercase().as_str() {
            "locked" => item.is_locked(),
            "unlocked" => !item.is_locked(),
            "modified" => item
                .flags()
                .map_err(|e| e.to_string())?
                .contains(ItemFlags::INITIALIZED),
            _ => true,
        })
    };
    let selector = match filter.to_ascii_lowercase().as_str() {
        "locked" | "unlocked" | "modified" => "",
        _ => filter,
    };
    let format = inv.registry.list_format().map_err(|e| e.to_string())?;
    let mut out = String::new();
    let mut current_section: Option<&str> = None;
    for item in select(inv.registry, selector, inv.default_section)? {
        if item.item_type() == ItemType::Function || !wanted(item)? {
            continue;
        }
        let values = render(&item.values().map_err(|e| e.to_string())?, item, None);
        match format.style {
            ListStyle::Plain => {
                if current_section != Some(item.section()) {
                    current_section = Some(item.section());
                    if !item.section().is_empty() {
                        let _ = writeln!(out, "{}[{}]:", format.prefix, item.section());
                    }
                }
                let _ = writeln!(out, "{}{} {}", format.prefix, item.name(), values);
            }
            ListStyle::Latex => {
                let _ = writeln!(
                    out,
                    "{}\\texttt{{{}}} & \\texttt{{{}}} \\\\",
                    format.prefix,
                    latex_escape(&item.qualified_name()),
                    latex_escape(&values)
                );
            }
        }
    }
    emit(inv.registry, &out)
}

fn latex_escape(text: &str) -> String {
    text.chars()
        .fold(String::with_capacity(text.len()), |mut out, c| {
            match c {
                '_' | '#' | '%' | '&' | '$' | '{' | '}' => {
                    out.push('\\');
                    out.push(c);
                }
                '\\' => out.push_str("\\textbackslash{}"),
                _ => out.push(c),
            }
            out
        })
}

fn get(inv: &Invocation) -> Result<(), String> {
    let name = argument(inv);
    if name.is_empty() {
        return Err("GET needs an item name".into());
    }
    let items = select(inv.registry, name, inv.default_section)?;
    let mut out = String::new();
    for item in items {
        let flags = item.flags().map_err(|e| e.to_string())?;
        let snapshot = json!({
            "section": item.section(),
            "name": item.name(),
            "type": item.item_type().name(),
            "size": item.size(),
            "locked": item.is_locked(),
            "initialized": flags.contains(ItemFlags::INITIALIZED),
            "values": item.values().map_err(|e| e.to_string())?.to_json(),
        });
        let _ = writeln!(out, "{}", snapshot);
    }
    emit(inv.registry, &out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latex_specials_are_escaped() {
        assert_eq!(latex_escape("A:Photon_Yield"), "A:Photon\\_Yield");
        assert_eq!(latex_escape("50%"), "50\\%");
    }
}
