use crate::error::{ConfregError, Result};
use crate::numeric::Number;

// written in the producer's byte order ahead of the envelope
pub const MAGIC: u32 = 0xD41F8A37;
pub const ENVELOPE: u32 = 900;
// UTF-8 item name, `[section]` selects a default section
pub const NAME: u32 = 901;
pub const TEXT: u32 = 902;
// u32 count, then i32 low/high pairs, (-1,-1) = all
pub const INDEX_LIST: u32 = 903;
// logical type, element size, pad option, reserved (u8 each), u32 count, data
pub const NUMBERS: u32 = 904;

// type, version, payload length
const HEADER_LEN: usize = 12;

fn malformed(what: &str) -> ConfregError {
    ConfregError::Binary(what.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn read<const N: usize>(self, bytes: &[u8], at: usize) -> Option<[u8; N]> {
        let mut raw: [u8; N] = bytes.get(at..at + N)?.try_into().ok()?;
        if self == ByteOrder::Big {
            raw.reverse();
        }
        Some(raw)
    }
    fn u32_at(self, bytes: &[u8], at: usize) -> Option<u32> {
        self.read::<4>(bytes, at).map(u32::from_le_bytes)
    }
    fn write(self, out: &mut Vec<u8>, mut le_bytes: Vec<u8>) {
        if self == ByteOrder::Big {
            le_bytes.reverse();
        }
        out.extend_from_slice(&le_bytes);
    }
    fn put_u32(self, out: &mut Vec<u8>, v: u32) {
        self.write(out, v.to_le_bytes().to_vec());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Signed = 1,
    Unsigned = 2,
    Real = 3,
}

impl LogicalType {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(LogicalType::Signed),
            2 => Some(LogicalType::Unsigned),
            3 => Some(LogicalType::Real),
            _ => None,
        }
    }
}

/// Decoded payload of a numbers record.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberArray {
    pub logical: LogicalType,
    pub element_size: u8,
    /// Short arrays are padded with zero instead of their last value.
    pub pad_zero: bool,
    pub values: Vec<Number>,
}

// ------------- Reading -------------
#[derive(Debug, Clone, Copy)]
pub struct Record<'b> {
    pub kind: u32,
    pub version: u32,
    pub payload: &'b [u8],
    order: ByteOrder,
}

/// Checks the magic marker and returns the envelope record of a buffer. Its
/// payload is a sequence of sub-records; externally defined element types use
/// their own type id as record type.
pub fn open(buffer: &[u8]) -> Result<Record<'_>> {
    if buffer.len() < 4 + HEADER_LEN {
        return Err(malformed("Binary configuration data is too short"));
    }
    let order = if ByteOrder::Little.u32_at(buffer, 0) == Some(MAGIC) {
        ByteOrder::Little
    } else if ByteOrder::Big.u32_at(buffer, 0) == Some(MAGIC) {
        ByteOrder::Big
    } else {
        return Err(malformed("Missing magic marker in binary configuration data"));
    };
    let (envelope, _) = read_record(buffer, 4, order)?;
    if envelope.kind != ENVELOPE {
        return Err(ConfregError::Binary(format!(
            "Expected envelope record but found type {}",
            envelope.kind
        )));
    }
    Ok(envelope)
}

fn read_record(bytes: &[u8], at: usize, order: ByteOrder) -> Result<(Record<'_>, usize)> {
    let header = |offset| {
        order
            .u32_at(bytes, at + offset)
            .ok_or_else(|| malformed("Truncated record header"))
    };
    let kind = header(0)?;
    let version = header(4)?;
    let length = header(8)? as usize;
    let start = at + HEADER_LEN;
    let payload = bytes
        .get(start..start + length)
        .ok_or_else(|| malformed("Record extends beyond its container"))?;
    Ok((
        Record {
            kind,
            version,
            payload,
            order,
        },
        start + length,
    ))
}

/// Iterates the sub-records of a container record.
pub struct SubRecords<'b> {
    bytes: &'b [u8],
    at: usize,
    order: ByteOrder,
}

impl<'b> Iterator for SubRecords<'b> {
    type Item = Result<Record<'b>>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.at >= self.bytes.len() {
            return None;
        }
        match read_record(self.bytes, self.at, self.order) {
            Ok((record, end)) => {
                self.at = end;
                Some(Ok(record))
            }
            Err(e) => {
                self.at = self.bytes.len();
                Some(Err(e))
            }
        }
    }
}

impl<'b> Record<'b> {
    pub fn sub_records(&self) -> SubRecords<'b> {
        SubRecords {
            bytes: self.payload,
            at: 0,
            order: self.order,
        }
    }

    pub fn text(&self) -> Result<&'b str> {
        let text = std::str::from_utf8(self.payload).map_err(|_| malformed("Text record is not UTF-8"))?;
        Ok(text.trim_end_matches('\0'))
    }

    pub fn index_pairs(&self) -> Result<Vec<(i64, i64)>> {
        let count = self
            .order
            .u32_at(self.payload, 0)
            .ok_or_else(|| malformed("Truncated index list"))? as usize;
        (0..count)
            .map(|i| {
                let at = 4 + i * 8;
                let low = self.order.read::<4>(self.payload, at).map(i32::from_le_bytes);
                let high = self.order.read::<4>(self.payload, at + 4).map(i32::from_le_bytes);
                match (low, high) {
                    (Some(l), Some(h)) => Ok((i64::from(l), i64::from(h))),
                    _ => Err(malformed("Truncated index list")),
                }
            })
            .collect()
    }

    pub fn numbers(&self) -> Result<NumberArray> {
        let p = self.payload;
        if p.len() < 8 {
            return Err(malformed("Truncated numbers record"));
        }
        let logical = LogicalType::from_code(p[0])
            .ok_or_else(|| ConfregError::Binary(format!("Unknown logical number type {}", p[0])))?;
        let size = p[1];
        let count = self
            .order
            .u32_at(p, 4)
            .ok_or_else(|| malformed("Truncated numbers record"))? as usize;
        let o = self.order;
        let values = (0..count)
            .map(|i| {
                let at = 8 + i * size as usize;
                let n = match (logical, size) {
                    (LogicalType::Signed, 1) => o.read::<1>(p, at).map(|b| Number::Signed(i8::from_le_bytes(b).into())),
                    (LogicalType::Signed, 2) => o.read::<2>(p, at).map(|b| Number::Signed(i16::from_le_bytes(b).into())),
                    (LogicalType::Signed, 4) => o.read::<4>(p, at).map(|b| Number::Signed(i32::from_le_bytes(b).into())),
                    (LogicalType::Signed, 8) => o.read::<8>(p, at).map(|b| Number::Signed(i64::from_le_bytes(b))),
                    (LogicalType::Unsigned, 1) => o.read::<1>(p, at).map(|b| Number::Unsigned(b[0].into())),
                    (LogicalType::Unsigned, 2) => o.read::<2>(p, at).map(|b| Number::Unsigned(u16::from_le_bytes(b).into())),
                    (LogicalType::Unsigned, 4) => o.read::<4>(p, at).map(|b| Number::Unsigned(u32::from_le_bytes(b).into())),
                    (LogicalType::Unsigned, 8) => o.read::<8>(p, at).map(|b| Number::Unsigned(u64::from_le_bytes(b))),
                    (LogicalType::Real, 4) => o.read::<4>(p, at).map(|b| Number::Real(f32::from_le_bytes(b).into())),
                    (LogicalType::Real, 8) => o.read::<8>(p, at).map(|b| Number::Real(f64::from_le_bytes(b))),
                    _ => {
                        return Err(ConfregError::Binary(format!(
                            "Unsupported element size {} for {:?} numbers",
                            size, logical
                        )));
                    }
                };
                n.ok_or_else(|| malformed("Truncated numbers record"))
            })
            .collect::<Result<Vec<Number>>>()?;
        Ok(NumberArray {
            logical,
            element_size: size,
            pad_zero: p[2] != 0,
            values,
        })
    }
}

// ------------- Writing -------------
/// Builds a binary configuration buffer.
#[derive(Debug, Clone)]
pub struct EnvelopeWriter {
    order: ByteOrder,
    body: Vec<u8>,
}

impl EnvelopeWriter {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            body: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: u32, payload: &[u8]) -> &mut Self {
        self.order.put_u32(&mut self.body, kind);
        self.order.put_u32(&mut self.body, 0);
        self.order.put_u32(&mut self.body, payload.len() as u32);
        self.body.extend_from_slice(payload);
        self
    }
    pub fn name(&mut self, name: &str) -> &mut Self {
        self.record(NAME, name.as_bytes())
    }
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.record(TEXT, text.as_bytes())
    }
    pub fn indices(&mut self, pairs: &[(i32, i32)]) -> &mut Self {
        let mut payload = Vec::with_capacity(4 + pairs.len() * 8);
        self.order.put_u32(&mut payload, pairs.len() as u32);
        for (low, high) in pairs {
            self.order.write(&mut payload, low.to_le_bytes().to_vec());
            self.order.write(&mut payload, high.to_le_bytes().to_vec());
        }
        self.record(INDEX_LIST, &payload)
    }
    /// Values are narrowed to `element_size` bytes of the given logical type.
    pub fn numbers(
        &mut self,
        logical: LogicalType,
        element_size: u8,
        pad_zero: bool,
        values: &[Number],
    ) -> Result<&mut Self> {
        let mut payload = vec![logical as u8, element_size, u8::from(pad_zero), 0];
        self.order.put_u32(&mut payload, values.len() as u32);
        for value in values {
            let n = value.to_kind(match logical {
                LogicalType::Signed => crate::numeric::NumericKind::Signed,
                LogicalType::Unsigned => crate::numeric::NumericKind::Unsigned,
                LogicalType::Real => crate::numeric::NumericKind::Real,
            });
            let bytes = match (n, element_size) {
                (Ok(Number::Signed(v)), 1) => (v as i8).to_le_bytes().to_vec(),
                (Ok(Number::Signed(v)), 2) => (v as i16).to_le_bytes().to_vec(),
                (Ok(Number::Signed(v)), 4) => (v as i32).to_le_bytes().to_vec(),
                (Ok(Number::Signed(v)), 8) => v.to_le_bytes().to_vec(),
                (Ok(Number::Unsigned(v)), 1) => (v as u8).to_le_bytes().to_vec(),
                (Ok(Number::Unsigned(v)), 2) => (v as u16).to_le_bytes().to_vec(),
                (Ok(Number::Unsigned(v)), 4) => (v as u32).to_le_bytes().to_vec(),
                (Ok(Number::Unsigned(v)), 8) => v.to_le_bytes().to_vec(),
                (Ok(Number::Real(v)), 4) => (v as f32).to_le_bytes().to_vec(),
                (Ok(Number::Real(v)), 8) => v.to_le_bytes().to_vec(),
                (Err(message), _) => return Err(ConfregError::Binary(message)),
                _ => {
                    return Err(ConfregError::Binary(format!(
                        "Unsupported element size {} for {:?} numbers",
                        element_size, logical
                    )));
                }
            };
            self.order.write(&mut payload, bytes);
        }
        Ok(self.record(NUMBERS, &payload))
    }

    pub fn finish(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + HEADER_LEN + self.body.len());
        self.order.put_u32(&mut out, MAGIC);
        self.order.put_u32(&mut out, ENVELOPE);
        self.order.put_u32(&mut out, 0);
        self.order.put_u32(&mut out, self.body.len() as u32);
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_byte_orders_are_accepted() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let buffer = EnvelopeWriter::new(order)
                .name("Foo")
                .indices(&[(0, 1), (-1, -1)])
                .finish();
            let envelope = open(&buffer).expect("envelope");
            let records: Vec<Record> = envelope.sub_records().collect::<Result<_>>().expect("records");
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].kind, NAME);
            assert_eq!(records[0].text().unwrap(), "Foo");
            assert_eq!(records[1].index_pairs().unwrap(), vec![(0, 1), (-1, -1)]);
        }
    }

    #[test]
    fn numbers_keep_their_encoding() {
        let buffer = EnvelopeWriter::new(ByteOrder::Big)
            .numbers(
                LogicalType::Signed,
                2,
                true,
                &[Number::Signed(-2), Number::Signed(300)],
            )
            .expect("numbers")
            .finish();
        let envelope = open(&buffer).unwrap();
        let record = envelope.sub_records().next().unwrap().unwrap();
        let array = record.numbers().unwrap();
        assert_eq!(array.logical, LogicalType::Signed);
        assert!(array.pad_zero);
        assert_eq!(array.values, vec![Number::Signed(-2), Number::Signed(300)]);
    }

    #[test]
    fn malformed_buffers_are_refused() {
        assert!(open(&[0u8; 8]).is_err());
        assert!(open(&[0u8; 32]).is_err());
        let mut buffer = EnvelopeWriter::new(ByteOrder::Little).text("Foo 1").finish();
        buffer.truncate(buffer.len() - 2);
        assert!(open(&buffer).is_err());
    }
}
