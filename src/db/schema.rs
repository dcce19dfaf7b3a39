//! Declared schema and a small SQLite DDL builder.
//!
//! ```ignore
//! let table = CreateTable::new("users")
//!     .if_not_exists()
//!     .column(ColumnDef::new("id", SqlType::Integer).primary_key().autoincrement())
//!     .column(ColumnDef::new("username", SqlType::Text).not_null().unique());
//!
//! println!("{}", table.to_sql());
//! ```

use rusqlite::Connection;

/// SQLite storage classes used by the declared schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Text,
    Real,
    Blob,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Text => "TEXT",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }
}

/// Column definition.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: SqlType,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary_key: false,
            autoincrement: false,
            not_null: false,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Only meaningful on an `INTEGER PRIMARY KEY`.
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Default value, as a raw SQL expression.
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type.as_str());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// CREATE TABLE statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTable {
    pub name: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
}

impl CreateTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            if_not_exists: false,
            columns: Vec::new(),
        }
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    pub fn to_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {}", c.to_sql()))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE {}{} (\n{}\n);",
            if self.if_not_exists { "IF NOT EXISTS " } else { "" },
            quote_ident(&self.name),
            columns
        )
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Tables the application declares, in dependency order.
pub fn declared_tables() -> Vec<CreateTable> {
    vec![CreateTable::new("users")
        .if_not_exists()
        .column(
            ColumnDef::new("id", SqlType::Integer)
                .primary_key()
                .autoincrement(),
        )
        .column(ColumnDef::new("username", SqlType::Text).not_null().unique())
        .column(ColumnDef::new("email", SqlType::Text).not_null())
        .column(ColumnDef::new("created_at", SqlType::Text).not_null())
        .column(ColumnDef::new("updated_at", SqlType::Text).not_null())]
}

/// The declared schema rendered as SQLite DDL.
pub fn declared_schema_sql() -> String {
    declared_tables()
        .iter()
        .map(CreateTable::to_sql)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// User tables present in the database, sorted by name.
pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt.query_map([], |row| row.get(0))?;
    names.collect()
}
