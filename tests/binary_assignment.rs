use std::sync::Arc;

use confreg::wire::{ByteOrder, EnvelopeWriter, LogicalType};
use confreg::{BinaryInterface, ConfregError, ItemDef, ItemFlags, Number, Registry, Values};

/// A pair of little endian `f32` coordinates.
struct Point;

impl BinaryInterface for Point {
    fn type_id(&self) -> u32 {
        77
    }
    fn name(&self) -> &str {
        "Point"
    }
    fn element_size(&self) -> usize {
        8
    }
    fn read(&self, payload: &[u8], element: &mut [u8]) -> Result<(), String> {
        if payload.len() != 8 {
            return Err(format!("A point takes 8 bytes, not {}", payload.len()));
        }
        element.copy_from_slice(payload);
        Ok(())
    }
}

fn point(x: f32, y: f32) -> Vec<u8> {
    let mut bytes = x.to_le_bytes().to_vec();
    bytes.extend_from_slice(&y.to_le_bytes());
    bytes
}

fn setup() -> Registry {
    let mut registry = Registry::new();
    registry.register_binary_interface(Arc::new(Point)).unwrap();
    registry
        .register(
            vec![
                ItemDef::new("Samples", "Short", 6),
                ItemDef::new("Scale", "Double", 2).bounds("0", "10"),
                ItemDef::new("Strict", "Integer", 2)
                    .bounds("0", "10")
                    .flags(ItemFlags::STRICT_BOUND),
                ItemDef::new("Corners", "77", 4),
                ItemDef::new("Label", "Text", 16),
            ],
            Some("Scope"),
        )
        .unwrap();
    registry.finalize(None).unwrap();
    registry
}

fn signed(values: &[i64]) -> Vec<Number> {
    values.iter().map(|&v| Number::Signed(v)).collect()
}

#[test]
fn consecutive_numbers_without_index_list() {
    let registry = setup();
    for order in [ByteOrder::Little, ByteOrder::Big] {
        let buffer = EnvelopeWriter::new(order)
            .name("Samples")
            .numbers(LogicalType::Signed, 4, false, &signed(&[1, 2, 3]))
            .unwrap()
            .numbers(LogicalType::Signed, 1, false, &signed(&[-4]))
            .unwrap()
            .finish();
        registry.apply_binary(&buffer).expect("binary assignment");
        assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![1, 2, 3, -4, 0, 0]));
    }
}

#[test]
fn index_lists_and_padding() {
    let registry = setup();
    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .indices(&[(-1, -1)])
        .numbers(LogicalType::Unsigned, 2, false, &[Number::Unsigned(5)])
        .unwrap()
        .finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![5; 6]));
    assert!(registry.flags("Samples").unwrap().contains(ItemFlags::ALL_INITIALIZED));

    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .indices(&[(1, 4)])
        .numbers(LogicalType::Signed, 2, true, &signed(&[7, 8]))
        .unwrap()
        .finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![5, 7, 8, 0, 0, 5]));

    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .indices(&[(0, 1), (4, 5)])
        .numbers(LogicalType::Signed, 8, false, &signed(&[9]))
        .unwrap()
        .finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![9, 9, 8, 0, 9, 9]));
}

#[test]
fn conversions_and_bounds() {
    let registry = setup();
    let buffer = EnvelopeWriter::new(ByteOrder::Big)
        .name("Scale")
        .numbers(LogicalType::Signed, 2, false, &signed(&[3, 40]))
        .unwrap()
        .finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.values("Scale").unwrap(), Values::F64(vec![3.0, 10.0]));

    let buffer = EnvelopeWriter::new(ByteOrder::Big)
        .name("Strict")
        .numbers(LogicalType::Real, 8, false, &[Number::Real(2.9), Number::Real(11.0)])
        .unwrap()
        .finish();
    assert!(matches!(
        registry.apply_binary(&buffer),
        Err(ConfregError::BoundViolation { .. })
    ));
    assert_eq!(registry.values("Strict").unwrap(), Values::I32(vec![0, 0]));

    // values that do not fit the element width are refused
    let buffer = EnvelopeWriter::new(ByteOrder::Big)
        .name("Samples")
        .numbers(LogicalType::Signed, 4, false, &signed(&[1, 100_000]))
        .unwrap()
        .finish();
    assert!(registry.apply_binary(&buffer).is_err());
    assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![0; 6]));
}

#[test]
fn text_records() {
    let registry = setup();
    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .indices(&[(2, 3)])
        .text("0x11")
        .finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![0, 0, 17, 17, 0, 0]));

    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Label")
        .text("\"first\"")
        .finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.text("Label").unwrap().as_deref(), Some("first"));

    // a lone text record is a whole statement
    let buffer = EnvelopeWriter::new(ByteOrder::Little).text("Scope:Scale 1, 2").finish();
    registry.apply_binary(&buffer).unwrap();
    assert_eq!(registry.values("Scale").unwrap(), Values::F64(vec![1.0, 2.0]));
}

#[test]
fn external_elements_are_replicated() {
    let registry = setup();
    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Corners")
        .indices(&[(1, 3)])
        .record(77, &point(1.5, -2.0))
        .finish();
    registry.apply_binary(&buffer).unwrap();
    match registry.values("Corners").unwrap() {
        Values::Bytes { element_size, data } => {
            assert_eq!(element_size, 8);
            assert_eq!(&data[..8], &[0u8; 8]);
            for idx in 1..4 {
                assert_eq!(&data[idx * 8..(idx + 1) * 8], point(1.5, -2.0).as_slice());
            }
        }
        other => panic!("unexpected storage {:?}", other),
    }

    // the record type must be the interface's own
    let buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Corners")
        .numbers(LogicalType::Real, 4, false, &[Number::Real(1.0), Number::Real(2.0)])
        .unwrap()
        .finish();
    assert!(matches!(registry.apply_binary(&buffer), Err(ConfregError::Binary(_))));

    // and external items have no text form
    assert!(registry.apply_text("Corners 1").is_err());
}

#[test]
fn malformed_buffers_change_nothing() {
    let registry = setup();
    assert!(registry.apply_binary(&[0u8; 8]).is_err());

    let mut buffer = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .numbers(LogicalType::Signed, 2, false, &signed(&[1, 2, 3]))
        .unwrap()
        .finish();
    buffer.truncate(buffer.len() - 1);
    assert!(registry.apply_binary(&buffer).is_err());

    let dangling = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .numbers(LogicalType::Signed, 2, false, &signed(&[1]))
        .unwrap()
        .indices(&[(0, 0)])
        .finish();
    assert!(matches!(registry.apply_binary(&dangling), Err(ConfregError::Binary(_))));

    let out_of_range = EnvelopeWriter::new(ByteOrder::Little)
        .name("Samples")
        .indices(&[(4, 6)])
        .numbers(LogicalType::Signed, 2, false, &signed(&[1]))
        .unwrap()
        .finish();
    assert!(registry.apply_binary(&out_of_range).is_err());
    assert_eq!(registry.values("Samples").unwrap(), Values::I16(vec![0; 6]));
}

#[test]
fn section_directive_record() {
    let registry = setup();
    let mut session = registry.session();
    let buffer = EnvelopeWriter::new(ByteOrder::Little).name("[Scope]").finish();
    session.apply_binary(&buffer).unwrap();
    assert_eq!(session.default_section(), Some("Scope"));
    let buffer = EnvelopeWriter::new(ByteOrder::Little).name("[Nowhere]").finish();
    assert!(matches!(
        session.apply_binary(&buffer),
        Err(ConfregError::UnknownSection(_))
    ));
}
