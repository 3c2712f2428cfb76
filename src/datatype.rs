// used to print out readable forms of stored values
use std::fmt;
// used when comparing the shape of caller-supplied storage
use std::mem;

// used for the JSON snapshots written by GET
use serde::Serialize;
use serde_json::Value as Json;

// our own stuff that we need
use crate::construct::{abbreviates, min_abbrev_len};
use crate::numeric::{Number, NumericKind};

// ------------- Item Types -------------
/// The resolved type of an item, as opposed to the declared type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Function,
    Short,
    UShort,
    XShort,
    Integer,
    UInteger,
    XInteger,
    Long,
    ULong,
    XLong,
    Character,
    UCharacter,
    XCharacter,
    Float,
    Double,
    Text,
    /// Element type provided by a registered [`BinaryInterface`].
    External(u32),
}

// tried in this order, the capitals mark the shortest accepted abbreviation
const VOCABULARY: &[(&str, ItemType)] = &[
    ("FUnction", ItemType::Function),
    ("Short", ItemType::Short),
    ("UShort", ItemType::UShort),
    ("XShort", ItemType::XShort),
    ("Integer", ItemType::Integer),
    ("UInteger", ItemType::UInteger),
    ("XInteger", ItemType::XInteger),
    ("Long", ItemType::Long),
    ("ULong", ItemType::ULong),
    ("XLong", ItemType::XLong),
    ("Character", ItemType::Character),
    ("UCharacter", ItemType::UCharacter),
    ("XCharacter", ItemType::XCharacter),
    ("FLoat", ItemType::Float),
    ("Real", ItemType::Double),
    ("Double", ItemType::Double),
    ("Text", ItemType::Text),
];

impl ItemType {
    /// Resolves a declared type string. A positive number requests an
    /// externally registered element type with that id.
    pub fn resolve(declared: &str) -> Option<ItemType> {
        let declared = declared.trim();
        if let Ok(id) = declared.parse::<u32>() {
            return (id > 0).then_some(ItemType::External(id));
        }
        VOCABULARY
            .iter()
            .find(|(name, _)| abbreviates(name, min_abbrev_len(name), declared))
            .map(|(_, t)| *t)
    }
    pub fn name(&self) -> String {
        match self {
            ItemType::External(id) => format!("type {}", id),
            ItemType::Double => "Double".into(),
            ItemType::Float => "Float".into(),
            ItemType::Function => "Function".into(),
            other => VOCABULARY
                .iter()
                .find(|(_, t)| t == other)
                .map(|(name, _)| name.to_string())
                .unwrap_or_default(),
        }
    }
    /// Bytes per element, unknown for external types until an interface is bound.
    pub fn element_size(&self) -> Option<usize> {
        match self {
            ItemType::Function => Some(0),
            ItemType::Character | ItemType::UCharacter | ItemType::XCharacter | ItemType::Text => {
                Some(1)
            }
            ItemType::Short | ItemType::UShort | ItemType::XShort => Some(2),
            ItemType::Integer | ItemType::UInteger | ItemType::XInteger | ItemType::Float => Some(4),
            ItemType::Long | ItemType::ULong | ItemType::XLong | ItemType::Double => Some(8),
            ItemType::External(_) => None,
        }
    }
    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self {
            ItemType::Short | ItemType::Integer | ItemType::Long | ItemType::Character => {
                Some(NumericKind::Signed)
            }
            ItemType::UShort | ItemType::UInteger | ItemType::ULong | ItemType::UCharacter => {
                Some(NumericKind::Unsigned)
            }
            ItemType::XShort | ItemType::XInteger | ItemType::XLong | ItemType::XCharacter => {
                Some(NumericKind::Hex)
            }
            ItemType::Float | ItemType::Double => Some(NumericKind::Real),
            _ => None,
        }
    }
    pub fn is_numeric(&self) -> bool {
        self.numeric_kind().is_some()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- Elements -------------
pub trait Element: Copy + fmt::Display + Serialize + Send + Sync {
    // static stuff which needs to be implemented downstream
    const TYPE_NAME: &'static str;
    /// `None` when the number does not fit the element width.
    fn from_number(n: Number) -> Option<Self>;
    fn to_number(self) -> Number;
    // instance callable with pre-made implementation
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
}

macro_rules! integer_element {
    ($t:ty, $name:expr, $variant:ident) => {
        impl Element for $t {
            const TYPE_NAME: &'static str = $name;
            fn from_number(n: Number) -> Option<Self> {
                match n {
                    Number::Signed(v) => <$t>::try_from(v).ok(),
                    Number::Unsigned(v) => <$t>::try_from(v).ok(),
                    Number::Real(_) => None,
                }
            }
            fn to_number(self) -> Number {
                Number::$variant(self.into())
            }
        }
    };
}

integer_element!(i8, "Character", Signed);
integer_element!(u8, "UCharacter", Unsigned);
integer_element!(i16, "Short", Signed);
integer_element!(u16, "UShort", Unsigned);
integer_element!(i32, "Integer", Signed);
integer_element!(u32, "UInteger", Unsigned);
integer_element!(i64, "Long", Signed);
integer_element!(u64, "ULong", Unsigned);

impl Element for f32 {
    const TYPE_NAME: &'static str = "Float";
    fn from_number(n: Number) -> Option<Self> {
        let v = match n {
            Number::Real(v) => v,
            Number::Signed(v) => v as f64,
            Number::Unsigned(v) => v as f64,
        };
        let narrowed = v as f32;
        (!(v.is_finite() && narrowed.is_infinite())).then_some(narrowed)
    }
    fn to_number(self) -> Number {
        Number::Real(self.into())
    }
}
impl Element for f64 {
    const TYPE_NAME: &'static str = "Double";
    fn from_number(n: Number) -> Option<Self> {
        Some(match n {
            Number::Real(v) => v,
            Number::Signed(v) => v as f64,
            Number::Unsigned(v) => v as f64,
        })
    }
    fn to_number(self) -> Number {
        Number::Real(self)
    }
}

fn store<T: Element>(slots: &mut [T], idx: usize, n: Number) -> Result<(), String> {
    let slot = slots
        .get_mut(idx)
        .ok_or_else(|| format!("Index {} is out of range", idx))?;
    *slot = T::from_number(n)
        .ok_or_else(|| format!("Value {} does not fit into {}", n, T::TYPE_NAME))?;
    Ok(())
}

fn copy_at<T: Copy>(target: &mut [T], source: &[T], idx: usize) {
    if let (Some(t), Some(s)) = (target.get_mut(idx), source.get(idx)) {
        *t = *s;
    }
}

// ------------- Scalars -------------
/// One element lifted out of its storage, as handed to callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<Number> for Scalar {
    fn from(n: Number) -> Self {
        match n {
            Number::Signed(v) => Scalar::Int(v),
            Number::Unsigned(v) => Scalar::UInt(v),
            Number::Real(v) => Scalar::Real(v),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Real(v) => write!(f, "{}", v),
            Scalar::Text(v) => write!(f, "\"{}\"", v),
            Scalar::Bytes(v) => write!(f, "{}", hex_bytes(v)),
        }
    }
}

pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ------------- Values -------------
/// Typed storage of an item. Text items hold one string, function items nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    None,
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Text(String),
    Bytes { element_size: usize, data: Vec<u8> },
}

macro_rules! with_numeric {
    ($values:expr, $v:ident => $body:expr, _ => $other:expr) => {
        match $values {
            Values::I8($v) => $body,
            Values::U8($v) => $body,
            Values::I16($v) => $body,
            Values::U16($v) => $body,
            Values::I32($v) => $body,
            Values::U32($v) => $body,
            Values::I64($v) => $body,
            Values::U64($v) => $body,
            Values::F32($v) => $body,
            Values::F64($v) => $body,
            _ => $other,
        }
    };
}

impl Values {
    /// Zero-initialized storage for `count` elements of `item_type`.
    pub fn zeroed(item_type: ItemType, count: usize, element_size: usize) -> Self {
        match item_type {
            ItemType::Function => Values::None,
            ItemType::Character => Values::I8(vec![0; count]),
            ItemType::UCharacter | ItemType::XCharacter => Values::U8(vec![0; count]),
            ItemType::Short => Values::I16(vec![0; count]),
            ItemType::UShort | ItemType::XShort => Values::U16(vec![0; count]),
            ItemType::Integer => Values::I32(vec![0; count]),
            ItemType::UInteger | ItemType::XInteger => Values::U32(vec![0; count]),
            ItemType::Long => Values::I64(vec![0; count]),
            ItemType::ULong | ItemType::XLong => Values::U64(vec![0; count]),
            ItemType::Float => Values::F32(vec![0.0; count]),
            ItemType::Double => Values::F64(vec![0.0; count]),
            ItemType::Text => Values::Text(String::new()),
            ItemType::External(_) => Values::Bytes {
                element_size,
                data: vec![0; count * element_size],
            },
        }
    }

    /// Whether caller-supplied storage has the shape an item declaration needs.
    pub fn fits(&self, item_type: ItemType, count: usize, element_size: usize) -> bool {
        let template = Values::zeroed(item_type, 0, element_size);
        if mem::discriminant(self) != mem::discriminant(&template) {
            return false;
        }
        match self {
            Values::None => true,
            Values::Text(s) => s.len() < count,
            Values::Bytes { element_size: e, data } => {
                *e == element_size && data.len() == count * element_size
            }
            _ => self.slots() == count,
        }
    }

    /// Number of independently stageable slots.
    pub fn slots(&self) -> usize {
        match self {
            Values::None => 0,
            Values::Text(_) => 1,
            Values::Bytes { element_size, data } => {
                if *element_size == 0 { 0 } else { data.len() / element_size }
            }
            numeric => with_numeric!(numeric, v => v.len(), _ => 0),
        }
    }

    pub fn number(&self, idx: usize) -> Option<Number> {
        with_numeric!(self, v => v.get(idx).map(|e| e.to_number()), _ => None)
    }

    pub fn set_number(&mut self, idx: usize, n: Number) -> Result<(), String> {
        with_numeric!(self, v => store(v, idx, n), _ => Err("Item does not hold numbers".into()))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Values::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn set_text(&mut self, text: &str) -> bool {
        match self {
            Values::Text(s) => {
                s.clear();
                s.push_str(text);
                true
            }
            _ => false,
        }
    }

    pub fn element_bytes(&self, idx: usize) -> Option<&[u8]> {
        match self {
            Values::Bytes { element_size, data } => {
                data.get(idx * element_size..(idx + 1) * element_size)
            }
            _ => None,
        }
    }

    pub fn element_bytes_mut(&mut self, idx: usize) -> Option<&mut [u8]> {
        match self {
            Values::Bytes { element_size, data } => {
                data.get_mut(idx * *element_size..(idx + 1) * *element_size)
            }
            _ => None,
        }
    }

    /// Copies slot `idx` of `source` (same shape) over our own.
    pub fn copy_slot(&mut self, source: &Values, idx: usize) {
        match (self, source) {
            (Values::I8(t), Values::I8(s)) => copy_at(t, s, idx),
            (Values::U8(t), Values::U8(s)) => copy_at(t, s, idx),
            (Values::I16(t), Values::I16(s)) => copy_at(t, s, idx),
            (Values::U16(t), Values::U16(s)) => copy_at(t, s, idx),
            (Values::I32(t), Values::I32(s)) => copy_at(t, s, idx),
            (Values::U32(t), Values::U32(s)) => copy_at(t, s, idx),
            (Values::I64(t), Values::I64(s)) => copy_at(t, s, idx),
            (Values::U64(t), Values::U64(s)) => copy_at(t, s, idx),
            (Values::F32(t), Values::F32(s)) => copy_at(t, s, idx),
            (Values::F64(t), Values::F64(s)) => copy_at(t, s, idx),
            (Values::Text(t), Values::Text(s)) => t.clone_from(s),
            (Values::Bytes { element_size, data }, Values::Bytes { data: s, .. }) => {
                let range = idx * *element_size..(idx + 1) * *element_size;
                if let (Some(t), Some(s)) = (data.get_mut(range.clone()), s.get(range)) {
                    t.copy_from_slice(s);
                }
            }
            _ => {}
        }
    }

    pub fn scalar(&self, idx: usize) -> Option<Scalar> {
        match self {
            Values::None => None,
            Values::Text(s) => Some(Scalar::Text(s.clone())),
            Values::Bytes { .. } => self.element_bytes(idx).map(|b| Scalar::Bytes(b.to_vec())),
            _ => self.number(idx).map(Scalar::from),
        }
    }

    /// Display form of one element; hex types print as `0x..`.
    pub fn display(&self, idx: usize, hex: bool) -> String {
        match (self.number(idx), self) {
            (Some(Number::Unsigned(v)), _) if hex => format!("0x{:x}", v),
            (Some(n), _) => n.to_string(),
            (None, Values::Text(s)) => s.clone(),
            (None, Values::Bytes { .. }) => self.element_bytes(idx).map(hex_bytes).unwrap_or_default(),
            _ => String::new(),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Values::None => Json::Null,
            Values::Text(s) => Json::String(s.clone()),
            Values::Bytes { element_size, data } => Json::Array(
                data.chunks((*element_size).max(1))
                    .map(|c| Json::String(hex_bytes(c)))
                    .collect(),
            ),
            numeric => with_numeric!(numeric, v => serde_json::to_value(v).unwrap_or(Json::Null), _ => Json::Null),
        }
    }
}

// ------------- Binary Interfaces -------------
/// Read/write/copy functions for an element type the registry does not know.
/// Registered under a numeric type id, which items then use as declared type
/// and binary value records carry as their record type.
pub trait BinaryInterface: Send + Sync {
    fn type_id(&self) -> u32;
    fn name(&self) -> &str;
    fn element_size(&self) -> usize;
    /// Decodes a value record payload into one element.
    fn read(&self, payload: &[u8], element: &mut [u8]) -> Result<(), String>;
    /// Encodes one element as a value record payload. Used by producers of
    /// binary streams; the registry itself only decodes.
    fn write(&self, element: &[u8]) -> Vec<u8> {
        element.to_vec()
    }
    /// Constructs a fresh element in zeroed storage.
    fn init(&self, _element: &mut [u8]) {}
    fn copy(&self, source: &[u8], target: &mut [u8]) {
        target.copy_from_slice(source)
    }
    fn describe(&self, element: &[u8]) -> String {
        hex_bytes(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_abbreviations() {
        assert_eq!(ItemType::resolve("Integer"), Some(ItemType::Integer));
        assert_eq!(ItemType::resolve("i"), Some(ItemType::Integer));
        assert_eq!(ItemType::resolve("fu"), Some(ItemType::Function));
        assert_eq!(ItemType::resolve("fl"), Some(ItemType::Float));
        assert_eq!(ItemType::resolve("f"), None);
        assert_eq!(ItemType::resolve("real"), Some(ItemType::Double));
        assert_eq!(ItemType::resolve("xlong"), Some(ItemType::XLong));
        assert_eq!(ItemType::resolve("17"), Some(ItemType::External(17)));
        assert_eq!(ItemType::resolve("0"), None);
        assert_eq!(ItemType::resolve("Integers"), None);
    }

    #[test]
    fn element_width() {
        let mut values = Values::zeroed(ItemType::Short, 2, 2);
        assert!(values.set_number(0, Number::Signed(-300)).is_ok());
        assert!(values.set_number(1, Number::Signed(70000)).is_err());
        assert_eq!(values.number(0), Some(Number::Signed(-300)));
        assert!(values.set_number(2, Number::Signed(1)).is_err());
    }

    #[test]
    fn storage_shape() {
        let values = Values::I32(vec![1, 2, 3]);
        assert!(values.fits(ItemType::Integer, 3, 4));
        assert!(!values.fits(ItemType::Integer, 4, 4));
        assert!(!values.fits(ItemType::Short, 3, 2));
        assert!(Values::Text("abc".into()).fits(ItemType::Text, 4, 1));
        assert!(!Values::Text("abcd".into()).fits(ItemType::Text, 4, 1));
    }

    #[test]
    fn hex_display() {
        let values = Values::U16(vec![255]);
        assert_eq!(values.display(0, true), "0xff");
        assert_eq!(values.display(0, false), "255");
    }
}
