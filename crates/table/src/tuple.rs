use crate::schema::ColumnType;
use mica_primitives::ColId;

/// A single column value.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type tag, or `None` for `Null`.
    pub fn ty(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::Int(_) => Some(ColumnType::Int),
            Value::Text(_) => Some(ColumnType::Text),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

/// A materialized row, ordered by logical column.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn column_count(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, col: ColId) -> &Value {
        &self.values[col.idx()]
    }

    pub fn set_value(&mut self, col: ColId, value: Value) {
        self.values[col.idx()] = value;
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Tuple {
    fn from(values: [V; N]) -> Self {
        Self::new(values.into_iter().map(Into::into).collect())
    }
}
