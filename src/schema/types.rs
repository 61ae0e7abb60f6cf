/// Column data type
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// Fixed-width RFC 3339 UTC text
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Timestamp => "TEXT",
        }
    }
}

/// Column definition
#[derive(Debug, Clone)]
pub struct Column {
    pub name: &'static str,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl Column {
    /// Create an optional (nullable) column
    pub const fn new(name: &'static str, col_type: ColumnType) -> Self {
        Self {
            name,
            col_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Create a required (non-nullable) column
    pub const fn required(name: &'static str, col_type: ColumnType) -> Self {
        Self {
            name,
            col_type,
            nullable: false,
            primary_key: false,
        }
    }

    /// Create the primary key column
    pub const fn key(name: &'static str, col_type: ColumnType) -> Self {
        Self {
            name,
            col_type,
            nullable: false,
            primary_key: true,
        }
    }

    /// Integer keys are assigned by SQLite on insert
    pub fn is_surrogate_key(&self) -> bool {
        self.primary_key && self.col_type == ColumnType::Integer
    }
}

/// Index definition
#[derive(Debug, Clone)]
pub struct Index {
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl Index {
    /// Create a non-unique index
    pub const fn on(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: false,
        }
    }

    /// Create a unique index
    pub const fn unique(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: true,
        }
    }
}

/// Table schema definition
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indexes: &'static [Index],
}

impl TableSchema {
    /// Columns supplied by the writer, i.e. everything but a surrogate key
    pub fn insert_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| !c.is_surrogate_key())
            .map(|c| c.name)
            .collect()
    }

    /// Comma-separated list of every column, for SELECT statements
    pub fn select_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
