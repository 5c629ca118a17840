//! Fixed-schema tuples and their fields.

use std::fmt;

use crate::common::config::STRING_LEN;
use crate::common::{Error, PageId, Result};

/// Type of a tuple field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 32-bit signed integer.
    Int,
    /// String of at most [`STRING_LEN`] bytes.
    Str,
}

impl FieldType {
    /// Serialized width in bytes.
    ///
    /// Strings are stored as a 4-byte length followed by a zero-padded
    /// buffer of `STRING_LEN` bytes.
    pub const fn len(&self) -> usize {
        match self {
            FieldType::Int => 4,
            FieldType::Str => STRING_LEN + 4,
        }
    }

    /// Decode a field of this type from the front of `data`.
    pub(crate) fn parse(&self, data: &[u8]) -> std::result::Result<Field, String> {
        if data.len() < self.len() {
            return Err(format!("{} bytes left for a {:?} field", data.len(), self));
        }
        match self {
            FieldType::Int => Ok(Field::Int(i32::from_le_bytes([
                data[0], data[1], data[2], data[3],
            ]))),
            FieldType::Str => {
                let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
                if len > STRING_LEN {
                    return Err(format!("string length {} exceeds {}", len, STRING_LEN));
                }
                String::from_utf8(data[4..4 + len].to_vec())
                    .map(Field::Str)
                    .map_err(|e| e.to_string())
            }
        }
    }
}

/// Comparison operators usable in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
}

/// A single typed value.
///
/// Fields of the same type compare naturally; the derived order puts every
/// `Int` before every `Str`, which never matters for a well-typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    /// The type of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Int(_) => FieldType::Int,
            Field::Str(_) => FieldType::Str,
        }
    }

    /// Evaluate `self <op> other`.
    ///
    /// # Example
    /// ```
    /// use pagedb::storage::{Field, Op};
    ///
    /// assert!(Field::Int(3).compare(Op::LessThan, &Field::Int(4)));
    /// assert!(!Field::Int(3).compare(Op::Equals, &Field::Int(4)));
    /// ```
    pub fn compare(&self, op: Op, other: &Field) -> bool {
        match op {
            Op::Equals => self == other,
            Op::NotEquals => self != other,
            Op::GreaterThan => self > other,
            Op::GreaterThanOrEq => self >= other,
            Op::LessThan => self < other,
            Op::LessThanOrEq => self <= other,
        }
    }

    /// Cut a string longer than `STRING_LEN` bytes at the last character
    /// boundary that fits, so the value matches what a page stores.
    pub(crate) fn fit_width(&mut self) {
        if let Field::Str(s) = self {
            s.truncate(stored_len(s));
        }
    }

    /// Append the fixed-width encoding of this field to `out`.
    ///
    /// Strings longer than `STRING_LEN` bytes are truncated the same way as
    /// [`fit_width`](Self::fit_width).
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Field::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Field::Str(s) => {
                let end = stored_len(s);
                out.extend_from_slice(&(end as u32).to_le_bytes());
                out.extend_from_slice(&s.as_bytes()[..end]);
                out.resize(out.len() + STRING_LEN - end, 0);
            }
        }
    }
}

/// Bytes of `s` kept in a fixed-width string slot.
fn stored_len(s: &str) -> usize {
    let mut end = s.len().min(STRING_LEN);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

/// The schema of a table: the ordered list of field types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleDesc {
    types: Vec<FieldType>,
}

impl TupleDesc {
    pub fn new(types: Vec<FieldType>) -> Self {
        Self { types }
    }

    /// Number of fields.
    pub fn num_fields(&self) -> usize {
        self.types.len()
    }

    pub fn field_type(&self, index: usize) -> Option<FieldType> {
        self.types.get(index).copied()
    }

    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    /// Serialized width of one tuple in bytes.
    pub fn tuple_size(&self) -> usize {
        self.types.iter().map(FieldType::len).sum()
    }

    /// Check that `tuple` has exactly this schema.
    pub fn validate(&self, tuple: &Tuple) -> Result<()> {
        if tuple.fields().len() != self.types.len() {
            return Err(Error::SchemaMismatch(format!(
                "expected {} fields, got {}",
                self.types.len(),
                tuple.fields().len()
            )));
        }
        for (i, (field, ty)) in tuple.fields().iter().zip(&self.types).enumerate() {
            if field.field_type() != *ty {
                return Err(Error::SchemaMismatch(format!(
                    "field {} is {:?}, expected {:?}",
                    i,
                    field.field_type(),
                    ty
                )));
            }
        }
        Ok(())
    }

    /// Decode one tuple from the front of `data`.
    pub(crate) fn parse_tuple(&self, data: &[u8]) -> std::result::Result<Tuple, String> {
        let mut offset = 0;
        let mut fields = Vec::with_capacity(self.types.len());
        for ty in &self.types {
            fields.push(ty.parse(&data[offset.min(data.len())..])?);
            offset += ty.len();
        }
        Ok(Tuple::new(fields))
    }
}

/// Where a tuple lives: a page and a slot on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

/// A row of field values, optionally tagged with where it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields,
            record_id: None,
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Truncate over-long strings to their stored width.
    pub(crate) fn fit_width(&mut self) {
        self.fields.iter_mut().for_each(Field::fit_width);
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }

    /// Same values, ignoring where the tuples were read from.
    pub fn same_values(&self, other: &Tuple) -> bool {
        self.fields == other.fields
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            field.write_to(out);
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.fields.iter().map(Field::to_string).collect();
        write!(f, "({})", values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageCategory;

    fn int_desc(n: usize) -> TupleDesc {
        TupleDesc::new(vec![FieldType::Int; n])
    }

    #[test]
    fn test_field_compare() {
        let three = Field::Int(3);
        let four = Field::Int(4);
        assert!(three.compare(Op::LessThan, &four));
        assert!(three.compare(Op::LessThanOrEq, &three));
        assert!(four.compare(Op::GreaterThan, &three));
        assert!(four.compare(Op::GreaterThanOrEq, &four));
        assert!(three.compare(Op::NotEquals, &four));
        assert!(!three.compare(Op::Equals, &four));
    }

    #[test]
    fn test_string_compare() {
        let a = Field::Str("apple".into());
        let b = Field::Str("banana".into());
        assert!(a.compare(Op::LessThan, &b));
    }

    #[test]
    fn test_tuple_size() {
        assert_eq!(int_desc(2).tuple_size(), 8);
        let mixed = TupleDesc::new(vec![FieldType::Int, FieldType::Str]);
        assert_eq!(mixed.tuple_size(), 4 + STRING_LEN + 4);
    }

    #[test]
    fn test_tuple_encoding() {
        let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Str]);
        let tuple = Tuple::new(vec![Field::Int(-17), Field::Str("hello".into())]);

        let mut bytes = Vec::new();
        tuple.write_to(&mut bytes);
        assert_eq!(bytes.len(), desc.tuple_size());

        let decoded = desc.parse_tuple(&bytes).unwrap();
        assert!(decoded.same_values(&tuple));
    }

    #[test]
    fn test_long_string_truncated_on_char_boundary() {
        let long = "é".repeat(STRING_LEN); // 2 bytes per char
        let mut bytes = Vec::new();
        Field::Str(long).write_to(&mut bytes);
        assert_eq!(bytes.len(), FieldType::Str.len());

        let decoded = FieldType::Str.parse(&bytes).unwrap();
        match decoded {
            Field::Str(s) => assert_eq!(s.len(), STRING_LEN),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn test_fit_width_matches_encoding() {
        let mut field = Field::Str("ab".repeat(STRING_LEN));
        let mut bytes = Vec::new();
        field.write_to(&mut bytes);

        field.fit_width();
        assert_eq!(FieldType::Str.parse(&bytes).unwrap(), field);

        let mut short = Field::Str("short".into());
        short.fit_width();
        assert_eq!(short, Field::Str("short".into()));
    }

    #[test]
    fn test_validate_schema() {
        let desc = int_desc(2);
        assert!(desc.validate(&Tuple::new(vec![Field::Int(1), Field::Int(2)])).is_ok());
        assert!(matches!(
            desc.validate(&Tuple::new(vec![Field::Int(1)])),
            Err(Error::SchemaMismatch(_))
        ));
        assert!(matches!(
            desc.validate(&Tuple::new(vec![Field::Int(1), Field::Str("x".into())])),
            Err(Error::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_same_values_ignores_record_id() {
        let mut a = Tuple::new(vec![Field::Int(1)]);
        let b = Tuple::new(vec![Field::Int(1)]);
        a.set_record_id(Some(RecordId::new(PageId::new(1, 1, PageCategory::Leaf), 0)));
        assert!(a.same_values(&b));
        assert_ne!(a, b);
    }
}
