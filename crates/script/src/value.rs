//! Dynamic values produced by a script evaluator.
//!
//! [`RawTable`] is the evaluator-facing shape: keys and values exactly as the
//! script produced them, in the order the evaluator enumerated them.
//! [`ScriptValue`] is the closed, owned shape the rest of the crate works with.

use modvault_intern::{InternPool, Text};
use std::collections::HashSet;

/// A table key as reported by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum RawKey {
    Number(f64),
    String(String),
    /// Booleans, tables or functions used as keys. Never addressable by name.
    Other,
}

impl From<&str> for RawKey {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}
impl From<String> for RawKey {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
impl From<i32> for RawKey {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}
impl From<f64> for RawKey {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// A value as reported by the evaluator.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RawValue {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Table(RawTable),
    /// Functions, userdata, coroutines.
    Opaque,
}

impl RawValue {
    pub fn as_table(&self) -> Option<&RawTable> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}
impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}
impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
impl From<i32> for RawValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}
impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}
impl From<RawTable> for RawValue {
    fn from(value: RawTable) -> Self {
        Self::Table(value)
    }
}

/// An evaluated table, entries in evaluator enumeration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    entries: Vec<(RawKey, RawValue)>,
}

impl RawTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table with consecutive integer keys starting at 1.
    pub fn sequence<V: Into<RawValue>>(values: impl IntoIterator<Item = V>) -> Self {
        let entries = values.into_iter().zip(1..).map(|(value, i): (V, i32)| (RawKey::from(i), value.into())).collect();
        Self { entries }
    }

    pub fn with(mut self, key: impl Into<RawKey>, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace an entry. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<RawKey>, value: impl Into<RawValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn entries(&self) -> &[(RawKey, RawValue)] {
        &self.entries
    }

    pub fn values(&self) -> impl Iterator<Item = &RawValue> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a string key; missing keys read as [`RawValue::Nil`].
    pub fn get(&self, key: &str) -> &RawValue {
        self.entries
            .iter()
            .find_map(|(k, v)| matches!(k, RawKey::String(s) if s == key).then_some(v))
            .unwrap_or(&RawValue::Nil)
    }

    fn get_index(&self, index: i64) -> &RawValue {
        self.entries
            .iter()
            .find_map(|(k, v)| matches!(k, RawKey::Number(n) if *n == index as f64).then_some(v))
            .unwrap_or(&RawValue::Nil)
    }

    /// Length of the contiguous run of non-nil values at keys `1, 2, 3...`.
    pub fn border(&self) -> usize {
        let present: HashSet<i64> = self
            .entries
            .iter()
            .filter_map(|(k, v)| match k {
                RawKey::Number(n) if !v.is_nil() && n.fract() == 0.0 => Some(*n as i64),
                _ => None,
            })
            .collect();
        let mut border = 0usize;
        while present.contains(&(border as i64 + 1)) {
            border += 1;
        }
        border
    }

    /// Whether this table should be read as an array.
    ///
    /// Only the first enumerated key is inspected: the table is an array if it
    /// is empty, or if that key is a number which (truncated to an integer)
    /// lies within `1..=border`. Any other first key makes it a map.
    pub fn is_array(&self) -> bool {
        let border = self.border() as i64;
        match self.entries.first() {
            None => true,
            Some((RawKey::Number(n), _)) => {
                let first = *n as i64;
                first.min(1) == 1 && first.max(border) == border
            },
            Some(_) => false,
        }
    }
}

/// A script value reduced to the closed set of shapes modvault understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Number(f64),
    String(Text),
    Array(Vec<ScriptValue>),
    /// String-keyed entries only; other keys are discarded.
    Table(Vec<(Text, ScriptValue)>),
}

impl ScriptValue {
    pub fn from_raw(raw: &RawValue, pool: &InternPool) -> Self {
        match raw {
            RawValue::Nil | RawValue::Opaque => Self::Null,
            RawValue::Bool(b) => Self::Bool(*b),
            RawValue::Number(n) => Self::Number(*n),
            RawValue::String(s) => Self::String(pool.intern(s)),
            RawValue::Table(table) if table.is_array() => {
                let border = table.border() as i64;
                Self::Array((1..=border).map(|i| Self::from_raw(table.get_index(i), pool)).collect())
            },
            RawValue::Table(table) => Self::Table(
                table
                    .entries()
                    .iter()
                    .filter_map(|(k, v)| match k {
                        RawKey::String(key) => Some((pool.intern(key), Self::from_raw(v, pool))),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Coerce to display text.
    ///
    /// Numbers and booleans are formatted, arrays and tables collapse to an
    /// empty string, null stays absent.
    pub fn to_text(&self, pool: &InternPool) -> Option<Text> {
        match self {
            Self::Null => None,
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(pool.intern(&n.to_string())),
            Self::Bool(b) => Some(pool.intern(if *b { "true" } else { "false" })),
            Self::Array(_) | Self::Table(_) => Some(pool.intern("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn convert(table: RawTable) -> ScriptValue {
        ScriptValue::from_raw(&RawValue::Table(table), &InternPool::default())
    }

    #[test]
    fn test_sequence_is_array() {
        let value = convert(RawTable::sequence(["a", "b", "c"]));
        let ScriptValue::Array(items) = value else {
            panic!("expected array, got {value:?}");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], ScriptValue::String("c".into()));
    }

    #[test]
    fn test_empty_table_is_empty_array() {
        assert_eq!(convert(RawTable::new()), ScriptValue::Array(vec![]));
    }

    #[test]
    fn test_string_first_key_is_map() {
        let table = RawTable::new().with("label", "Difficulty").with(1, "ignored");
        let value = convert(table);
        assert_eq!(value, ScriptValue::Table(vec![("label".into(), ScriptValue::String("Difficulty".into()))]));
    }

    #[test]
    fn test_only_first_key_decides() {
        // First key is a valid index, so trailing string keys are dropped.
        let table = RawTable::new().with(1, "one").with(2, "two").with("name", "x");
        assert_eq!(
            convert(table),
            ScriptValue::Array(vec![ScriptValue::String("one".into()), ScriptValue::String("two".into())])
        );
    }

    #[rstest]
    #[case::zero_index(0.0)]
    #[case::beyond_border(5.0)]
    #[case::negative(-1.0)]
    fn test_first_key_outside_border_is_map(#[case] first: f64) {
        let table = RawTable::new().with(first, "x").with(1, "one").with(2, "two");
        assert!(!table.is_array());
        // Numeric keys don't survive in map form.
        assert_eq!(convert(table), ScriptValue::Table(vec![]));
    }

    #[test]
    fn test_first_key_inside_border_out_of_order() {
        let table = RawTable::new().with(2, "two").with(1, "one");
        assert!(table.is_array());
        assert_eq!(
            convert(table),
            ScriptValue::Array(vec![ScriptValue::String("one".into()), ScriptValue::String("two".into())])
        );
    }

    #[test]
    fn test_border_stops_at_gap() {
        let table = RawTable::new().with(1, "a").with(2, "b").with(4, "d");
        assert_eq!(table.border(), 2);
        let nil_hole = RawTable::new().with(1, "a").with(2, RawValue::Nil).with(3, "c");
        assert_eq!(nil_hole.border(), 1);
    }

    #[test]
    fn test_opaque_becomes_null() {
        assert_eq!(ScriptValue::from_raw(&RawValue::Opaque, &InternPool::default()), ScriptValue::Null);
    }

    #[rstest]
    #[case::null(ScriptValue::Null, None)]
    #[case::string(ScriptValue::String("Hi".into()), Some("Hi"))]
    #[case::integral(ScriptValue::Number(1.0), Some("1"))]
    #[case::fractional(ScriptValue::Number(0.25), Some("0.25"))]
    #[case::boolean(ScriptValue::Bool(false), Some("false"))]
    #[case::array(ScriptValue::Array(vec![ScriptValue::Bool(true)]), Some(""))]
    #[case::table(ScriptValue::Table(vec![]), Some(""))]
    fn test_to_text(#[case] value: ScriptValue, #[case] expected: Option<&str>) {
        let pool = InternPool::default();
        assert_eq!(value.to_text(&pool).as_deref(), expected);
    }
}
