//! The minimal schema contract the storage core consumes.
//!
//! The full type system (value conversions, numeric towers, collations) is an
//! external collaborator; the core only needs column count, a per-column type
//! tag to lay tiles out, and nullability for the NOT NULL check on insert.

use mica_primitives::ColId;

/// Type tag of a column.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ColumnType {
    Bool,
    Int,
    Text,
}

/// A single column definition.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Column {
    name: String,
    ty: ColumnType,
    nullable: bool,
}

impl Column {
    /// A NOT NULL column.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ColumnType {
        self.ty
    }

    pub fn allows_null(&self) -> bool {
        self.nullable
    }
}

/// An ordered list of columns.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, col: ColId) -> &Column {
        &self.columns[col.idx()]
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn iter(&self) -> impl Iterator<Item = (ColId, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, c)| (ColId(i as u32), c))
    }
}
