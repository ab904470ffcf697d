//! Column-wise tabular results.
//!
//! A [`Frame`] stores one typed vector per column, which is the shape most
//! analysis code wants. Frames from several queries can be stacked.

use super::{Record, ERROR_FIELDS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a single cell in a frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text value. Nested JSON arrays and objects are kept as their JSON text.
    String(String),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
        }
    }

    /// Converts the cell back to JSON. Non-finite floats become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            nested => Value::String(nested.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

/// One named column of a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// A column-wise table. Every column has the same number of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<Column>,
    height: usize,
}

impl Frame {
    /// Creates an empty frame with no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a frame with one column and one row.
    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            columns: vec![Column {
                name: name.into(),
                values: vec![value.into()],
            }],
            height: 1,
        }
    }

    /// Creates the one-row frame used to report an error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::single("error", message.into())
    }

    /// Builds a frame from records; columns appear in first-seen order and
    /// missing cells are NULL.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut frame = Self::new();
        for record in records {
            frame.push_record(record);
        }
        frame
    }

    /// Builds a frame from decoded JSON.
    ///
    /// Accepts an array of objects or a single object. Anything else cannot
    /// be laid out as columns and is reported as an error.
    pub fn from_json(value: &serde_json::Value) -> std::result::Result<Self, String> {
        match value {
            serde_json::Value::Null => Ok(Self::new()),
            serde_json::Value::Object(record) => Ok(Self::from_records([record])),
            serde_json::Value::Array(items) => {
                let mut frame = Self::new();
                for (i, item) in items.iter().enumerate() {
                    let record = item.as_object().ok_or_else(|| {
                        format!("Cannot convert to frame: element {i} is not an object")
                    })?;
                    frame.push_record(record);
                }
                Ok(frame)
            }
            other => Err(format!(
                "Cannot convert to frame: expected an array of objects, got {}",
                json_type_name(other)
            )),
        }
    }

    /// Appends a row, adding any new columns (back-filled with NULL).
    pub fn push_record(&mut self, record: &Record) {
        for key in record.keys() {
            if self.column_index(key).is_none() {
                self.columns.push(Column {
                    name: key.clone(),
                    values: vec![Value::Null; self.height],
                });
            }
        }
        for column in &mut self.columns {
            let cell = record.get(&column.name).map(Value::from).unwrap_or_default();
            column.values.push(cell);
        }
        self.height += 1;
    }

    /// Stacks frames vertically over the union of their columns.
    pub fn concat<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut out = Self::new();
        for frame in frames {
            out.append(frame);
        }
        out
    }

    /// Appends all rows of `other` to this frame.
    pub fn append(&mut self, other: Frame) {
        for column in &other.columns {
            if self.column_index(&column.name).is_none() {
                self.columns.push(Column {
                    name: column.name.clone(),
                    values: vec![Value::Null; self.height],
                });
            }
        }

        let Frame {
            columns: mut incoming,
            height: added,
        } = other;

        for column in &mut self.columns {
            match incoming.iter_mut().find(|c| c.name == column.name) {
                Some(source) => column.values.append(&mut source.values),
                None => column
                    .values
                    .extend(std::iter::repeat(Value::Null).take(added)),
            }
        }
        self.height += added;
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns the values of the named column.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.column_index(name)
            .map(|i| self.columns[i].values.as_slice())
    }

    /// Returns the cell at `row` in the named column.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|values| values.get(row))
    }

    /// Converts the frame back to records, one per row.
    pub fn to_records(&self) -> Vec<Record> {
        (0..self.height)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect()
            })
            .collect()
    }

    /// Returns the message of a single-row error frame.
    ///
    /// The frame may also carry the `data`, `line` and `column` fields of a
    /// parse failure, but no other columns.
    pub fn error_message(&self) -> Option<String> {
        let error_shaped = self
            .columns
            .iter()
            .all(|c| ERROR_FIELDS.contains(&c.name.as_str()));
        if self.height != 1 || !error_shaped {
            return None;
        }
        match self.column("error")?.first()? {
            Value::String(message) => Some(message.clone()),
            _ => None,
        }
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
