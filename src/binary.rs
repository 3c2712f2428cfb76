use tracing::warn;

use crate::assign;
use crate::construct::{Item, ItemFlags, ItemState};
use crate::datatype::ItemType;
use crate::error::{ConfregError, Result};
use crate::numeric::{Number, NumericKind, parse_number};
use crate::registry::Registry;
use crate::wire::{self, Record};

fn structural(message: impl Into<String>) -> ConfregError {
    let message = message.into();
    warn!("{}", message);
    ConfregError::Binary(message)
}

/// Turns index list pairs into inclusive element ranges; `(-1,-1)` is everything.
fn resolve_pairs(pairs: &[(i64, i64)], count: usize) -> Result<Vec<(usize, usize)>> {
    pairs
        .iter()
        .map(|&(low, high)| {
            if (low, high) == (-1, -1) {
                return Ok((0, count.saturating_sub(1)));
            }
            if low < 0 || high < low {
                return Err(structural(format!("Invalid index range {}-{}", low, high)));
            }
            if high as usize >= count {
                return Err(structural(format!("Index {} is out of range", high)));
            }
            Ok((low as usize, high as usize))
        })
        .collect()
}

/// Applies one binary buffer on behalf of a session.
pub(crate) fn apply_binary(
    registry: &Registry,
    default_section: &mut Option<String>,
    buffer: &[u8],
) -> Result<()> {
    let envelope = wire::open(buffer).inspect_err(|e| warn!(error = %e, "Invalid binary configuration data"))?;
    // decode everything up front so a malformed record aborts before any change
    let records = envelope.sub_records().collect::<Result<Vec<Record>>>()?;
    let Some((head, values)) = records.split_first() else {
        return Err(structural("Empty binary configuration record"));
    };
    match head.kind {
        wire::TEXT => {
            if !values.is_empty() {
                return Err(structural("A text record must be the only record of its envelope"));
            }
            return assign::apply_statement(registry, default_section, head.text()?);
        }
        wire::NAME => {}
        other => {
            return Err(structural(format!("Expected a name record but found type {}", other)));
        }
    }

    let name = head.text()?.trim();
    if let Some(section) = name.strip_prefix('[').and_then(|n| n.strip_suffix(']')) {
        if !values.is_empty() {
            return Err(structural("A section directive takes no values"));
        }
        return assign::select_section(registry, default_section, section);
    }
    let item = assign::resolve_item(registry, default_section.as_deref(), name)?;
    if item
        .flags()?
        .contains(ItemFlags::REJECT_AFTER_INIT | ItemFlags::NOT_INITIAL)
    {
        warn!(item = item.name(), "Modification of configuration item rejected");
        return Err(ConfregError::Rejected(item.name().to_string()));
    }
    registry.record(&format!("{} <binary>", item.name()))?;
    let default_section = default_section.as_deref();

    match item.item_type() {
        ItemType::Function | ItemType::Text => {
            for record in values {
                match record.kind {
                    wire::TEXT => assign::assign(registry, item, record.text()?, default_section)?,
                    wire::INDEX_LIST => {}
                    other => warn!(item = item.name(), record = other, "Only text records apply to this item"),
                }
            }
            Ok(())
        }
        item_type => {
            let _transaction = item.begin()?;
            let mut state = item.lock_state()?;
            let outcome = match item_type {
                ItemType::External(id) => apply_external(item, &mut state, values, id),
                _ => apply_numbers(item, &mut state, values),
            };
            match outcome {
                Ok(full_range) => item.settle(registry, state, full_range, true, default_section),
                Err(e) => {
                    state.rollback(item.interface());
                    warn!(item = item.name(), error = %e, "Binary assignment abandoned");
                    Err(e)
                }
            }
        }
    }
}

/// Where a value record goes: an explicit index list, or the elements
/// following the previous value record.
#[derive(Debug, Clone, Copy)]
enum Targets<'t> {
    Listed(&'t [(usize, usize)]),
    After(usize),
}

impl Targets<'_> {
    /// Element indices for a record holding `len` values.
    fn indices(&self, len: usize) -> Vec<usize> {
        match self {
            Targets::Listed(ranges) => ranges.iter().flat_map(|&(low, high)| low..=high).collect(),
            Targets::After(start) => (*start..*start + len.max(1)).collect(),
        }
    }
}

/// Feeds every value record with its targets to `apply`, which returns the
/// indices it wrote. Reports whether one record covered the whole item.
fn for_each_value<'b>(
    item: &Item,
    records: &[Record<'b>],
    mut apply: impl FnMut(&Record<'b>, Targets<'_>) -> Result<Vec<usize>>,
) -> Result<bool> {
    let count = item.element_count();
    let mut ranges: Option<Vec<(usize, usize)>> = None;
    let mut next = 0usize;
    let mut full_range = false;
    for record in records {
        if record.kind == wire::INDEX_LIST {
            if ranges.is_some() {
                return Err(structural("Index list without value record"));
            }
            ranges = Some(resolve_pairs(&record.index_pairs()?, count)?);
            continue;
        }
        let written = match ranges.take() {
            Some(list) => {
                if list.iter().any(|&(low, high)| low == 0 && high + 1 == count) {
                    full_range = true;
                }
                apply(record, Targets::Listed(&list))?
            }
            None => apply(record, Targets::After(next))?,
        };
        if let Some(&last) = written.last() {
            next = last + 1;
        }
    }
    if ranges.is_some() {
        return Err(structural("Index list without value record"));
    }
    Ok(full_range)
}

fn apply_numbers(item: &Item, state: &mut ItemState, records: &[Record]) -> Result<bool> {
    let name = item.name();
    let count = item.element_count();
    let Some(kind) = item.item_type().numeric_kind() else {
        return Err(structural("Item does not hold numbers"));
    };
    let target = match kind {
        NumericKind::Hex => NumericKind::Unsigned,
        other => other,
    };
    let strict = state.flags.strict();
    let bounded = |n: Number| {
        item.bounds()
            .apply(name, n, strict)
            .map_err(|message| ConfregError::BoundViolation {
                item: name.to_string(),
                message,
            })
    };
    for_each_value(item, records, |record, targets| {
        let (indices, numbers) = match record.kind {
            wire::NUMBERS => {
                let array = record.numbers()?;
                let Some(&last) = array.values.last() else {
                    return Err(structural("Empty numbers record"));
                };
                let pad = if array.pad_zero { Number::Signed(0) } else { last };
                let indices = targets.indices(array.values.len());
                let numbers = (0..indices.len())
                    .map(|k| {
                        array
                            .values
                            .get(k)
                            .copied()
                            .unwrap_or(pad)
                            .to_kind(target)
                            .map_err(|message| ConfregError::syntax(name, message))
                            .and_then(bounded)
                    })
                    .collect::<Result<Vec<_>>>()?;
                (indices, numbers)
            }
            wire::TEXT => {
                let indices = targets.indices(1);
                let text = assign::preprocess(record.text()?);
                let n = parse_number(kind, &text).map_err(|message| ConfregError::syntax(name, message))?;
                let numbers = vec![bounded(n)?; indices.len()];
                (indices, numbers)
            }
            other => {
                return Err(structural(format!(
                    "Record type {} cannot be assigned to numeric item '{}'",
                    other, name
                )));
            }
        };
        for (&idx, &n) in indices.iter().zip(&numbers) {
            if idx >= count {
                return Err(structural(format!("Index {} is out of range", idx)));
            }
            state.stage(idx, idx);
            state
                .values
                .set_number(idx, n)
                .map_err(|message| ConfregError::syntax(name, message))?;
        }
        Ok(indices)
    })
}

fn apply_external(item: &Item, state: &mut ItemState, records: &[Record], type_id: u32) -> Result<bool> {
    let Some(interface) = item.interface() else {
        return Err(structural(format!("No binary interface for type {}", type_id)));
    };
    for_each_value(item, records, |record, targets| {
        if record.kind != type_id {
            return Err(structural(format!(
                "Record type {} does not match type {} of item '{}'",
                record.kind,
                type_id,
                item.name()
            )));
        }
        let indices = targets.indices(1);
        let Some(&first) = indices.first() else {
            return Ok(indices);
        };
        for &idx in &indices {
            if idx >= item.element_count() {
                return Err(structural(format!("Index {} is out of range", idx)));
            }
            state.stage(idx, idx);
        }
        let element = state
            .values
            .element_bytes_mut(first)
            .ok_or_else(|| structural(format!("Index {} is out of range", first)))?;
        interface
            .read(record.payload, element)
            .map_err(|message| ConfregError::syntax(item.name(), message))?;
        let source = element.to_vec();
        for &idx in &indices[1..] {
            if let Some(target) = state.values.element_bytes_mut(idx) {
                interface.copy(&source, target);
            }
        }
        Ok(indices)
    })
}
