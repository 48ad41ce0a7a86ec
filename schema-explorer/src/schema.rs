//! Schema types for dynamic database introspection
//!
//! These types are structural snapshots of store objects taken at operation
//! time. Nothing here is cached; every operation reloads what it needs.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Schema-qualified table name, always rendered as `schema.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table` or a bare `table`
    ///
    /// Only the first dot separates the schema, so `a.b.c` is table `b.c` in
    /// schema `a`. Unqualified input lands in `default_schema`.
    pub fn parse(input: &str, default_schema: &str) -> Self {
        match input.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new(default_schema, input),
        }
    }

    /// The name as it appears in file names (`schema_table`)
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.schema, self.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.schema, self.name)
    }
}

impl Serialize for TableName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Closed semantic classification of a column or parameter type
///
/// Assigned once at load time from the declared type name; all dispatch on
/// column types goes through this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SemanticType {
    Text,
    DateTime,
    Integer,
    Floating,
    Boolean,
    Json,
    Binary,
    Other,
}

impl SemanticType {
    /// Classify a declared SQL type name
    ///
    /// Accepts PostgreSQL `information_schema` spellings (`character varying`,
    /// `timestamp with time zone`) as well as SQLite declared types, which
    /// may carry a length suffix such as `VARCHAR(255)`.
    pub fn from_sql_type(type_name: &str) -> Self {
        let lowered = type_name.trim().to_ascii_lowercase();
        if lowered.ends_with("[]") || lowered == "array" {
            return SemanticType::Other;
        }
        let base = match lowered.find('(') {
            Some(index) => lowered[..index].trim_end(),
            None => lowered.as_str(),
        };

        match base {
            "boolean" | "bool" => SemanticType::Boolean,
            "json" | "jsonb" => SemanticType::Json,
            "bytea" | "blob" | "binary" | "varbinary" => SemanticType::Binary,
            "date" | "datetime" | "timestamp" | "timestamptz" | "timestamp without time zone"
            | "timestamp with time zone" => SemanticType::DateTime,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" | "numeric"
            | "decimal" | "money" => SemanticType::Floating,
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint" | "tinyint"
            | "mediumint" | "serial" | "smallserial" | "bigserial" => SemanticType::Integer,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" | "name"
            | "citext" | "clob" | "nvarchar" | "nchar" | "string" => SemanticType::Text,
            // SQLite affinity rules for anything else
            other if other.contains("int") && !other.contains("interval") && !other.contains("point") => {
                SemanticType::Integer
            }
            other if other.contains("char") || other.contains("text") || other.contains("clob") => {
                SemanticType::Text
            }
            other if other.contains("real") || other.contains("floa") || other.contains("doub") => {
                SemanticType::Floating
            }
            _ => SemanticType::Other,
        }
    }

    pub fn is_text(self) -> bool {
        self == SemanticType::Text
    }

    pub fn is_date(self) -> bool {
        self == SemanticType::DateTime
    }
}

/// Information about a single column
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,

    /// Declared type as reported by the store (e.g. "integer", "VARCHAR(255)")
    pub data_type: String,

    pub semantic_type: SemanticType,

    pub nullable: bool,

    /// Default value expression (if any)
    pub default_value: Option<String>,

    pub is_primary_key: bool,

    /// Value is produced by the store (sequence, identity, rowid alias or generated column)
    pub is_generated: bool,

    /// Type expression bound text is cast to before reaching the column.
    /// Only set for stores that need explicit casts.
    #[serde(skip)]
    pub cast_type: Option<String>,
}

impl ColumnDescriptor {
    /// Columns the store fills in by itself are left out of insert forms
    pub fn is_insertable(&self) -> bool {
        !self.is_generated
    }
}

/// Declared foreign key constraint information
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyEdge {
    /// Column name in this table
    pub column: String,

    pub references_table: TableName,

    pub references_column: String,
}

/// Complete schema information for a database table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: TableName,

    /// Columns in declaration order
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key column names in key order (empty when the table has none)
    pub primary_key: Vec<String>,

    /// Declared foreign keys, keyed by local column
    pub foreign_keys: BTreeMap<String, ForeignKeyEdge>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn text_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|column| column.semantic_type.is_text())
    }

    /// The primary key column, if the key is exactly one column
    pub fn single_primary_key(&self) -> Option<&ColumnDescriptor> {
        match self.primary_key.as_slice() {
            [only] => self.column(only),
            _ => None,
        }
    }
}

/// Direction of a procedure parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterMode {
    In,
    Out,
    InOut,
}

impl ParameterMode {
    pub fn from_sql(mode: Option<&str>) -> Self {
        match mode.map(str::to_ascii_uppercase).as_deref() {
            Some("OUT") => ParameterMode::Out,
            Some("INOUT") => ParameterMode::InOut,
            _ => ParameterMode::In,
        }
    }
}

/// A single declared procedure parameter
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub name: String,

    pub data_type: String,

    pub semantic_type: SemanticType,

    pub mode: ParameterMode,

    #[serde(skip)]
    pub cast_type: Option<String>,

    /// Inferred reference, filled in by enrichment
    pub reference: Option<Reference>,
}

/// A stored procedure and its ordered parameter list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureDescriptor {
    pub schema: String,

    pub name: String,

    /// Store-internal overload name, used only for metadata lookups
    #[serde(skip)]
    pub specific_name: String,

    pub parameters: Vec<ParameterDescriptor>,
}

impl ProcedureDescriptor {
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }
}

/// Display column for a referenced table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelColumn {
    Single(String),
    /// Two columns joined with a single space
    Composite { first: String, second: String },
}

impl fmt::Display for LabelColumn {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelColumn::Single(column) => formatter.write_str(column),
            LabelColumn::Composite { first, second } => write!(formatter, "{} {}", first, second),
        }
    }
}

impl Serialize for LabelColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One selectable candidate for a reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionEntry {
    pub id: serde_json::Value,
    pub label: String,
}

/// A resolved reference to another table together with its candidate list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub table: TableName,

    pub id_column: String,

    pub label_column: LabelColumn,

    pub options: Vec<OptionEntry>,

    /// Set when the option lookup failed; the list is then empty
    pub options_error: Option<String>,
}

/// A column shown on an insert form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertColumn {
    #[serde(flatten)]
    pub column: ColumnDescriptor,

    /// Declared foreign key target with options
    pub reference: Option<Reference>,
}

/// Everything needed to render an insert form
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertForm {
    pub table: TableName,
    pub columns: Vec<InsertColumn>,
}

/// Field-scoped and global error messages for a rejected submission
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldErrors {
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,

    #[serde(rename = "_global", skip_serializing_if = "Option::is_none")]
    pub global: Option<String>,
}

impl FieldErrors {
    pub fn field(column: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.fields.insert(column.into(), message.into());
        errors
    }

    pub fn global(message: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            global: Some(message.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.global.is_none()
    }
}

/// Result of an insert attempt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum InsertOutcome {
    /// Row created; `values` holds what was bound, so store-generated keys are absent
    Inserted {
        table: TableName,
        values: serde_json::Map<String, serde_json::Value>,
    },
    /// Nothing was written; `entered` echoes the raw input for correction
    Rejected {
        table: TableName,
        errors: FieldErrors,
        entered: HashMap<String, String>,
    },
}

/// Result of a procedure call attempt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CallOutcome {
    Called {
        procedure: String,
        message: String,
    },
    Rejected {
        procedure: String,
        errors: FieldErrors,
        entered: HashMap<String, String>,
    },
}

/// Result of polling for rows past a primary key watermark
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChangeSet {
    #[serde(rename_all = "camelCase")]
    Rows {
        primary_key: String,
        rows: Vec<serde_json::Value>,
    },
    /// The table has no single-column primary key to use as a cursor
    Unsupported { message: String },
    /// No watermark was supplied
    #[serde(rename_all = "camelCase")]
    MissingCursor {
        primary_key: String,
        message: String,
    },
}

/// Free-text and date-range filter input, shared by browse, export and timeline
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequest {
    pub q: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub date_col: Option<String>,
}

/// Query parameters for browsing rows
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseQuery {
    /// One-based page number
    #[serde(default = "default_page")]
    pub page: u64,

    /// Rows per page; the configured default applies when absent
    pub limit: Option<u64>,

    pub q: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub date_col: Option<String>,

    /// Order by primary key descending (latest first)
    #[serde(default = "default_true")]
    pub latest_first: bool,
}

impl BrowseQuery {
    pub fn filter(&self) -> FilterRequest {
        FilterRequest {
            q: self.q.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            date_col: self.date_col.clone(),
        }
    }
}

impl Default for BrowseQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: None,
            q: None,
            date_from: None,
            date_to: None,
            date_col: None,
            latest_first: true,
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

/// One page of browsed rows
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowsePage {
    pub table: TableDescriptor,

    /// Column names in table order
    pub columns: Vec<String>,

    pub rows: Vec<serde_json::Value>,

    pub page: u64,

    pub limit: u64,

    /// Total number of rows matching the filters
    pub total: u64,

    pub has_more: bool,
}

/// Query parameters for exporting rows
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub q: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub date_col: Option<String>,
    pub limit: Option<u64>,
}

impl ExportQuery {
    pub fn filter(&self) -> FilterRequest {
        FilterRequest {
            q: self.q.clone(),
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            date_col: self.date_col.clone(),
        }
    }
}

/// Query parameters for the date-axis view
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineQuery {
    pub date_col: Option<String>,
    /// Day to show rows for (`YYYY-MM-DD`); the newest bucket when absent
    pub day: Option<String>,
    pub q: Option<String>,
}

/// Query parameters for polling rows past a primary key watermark
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesQuery {
    pub after_pk: Option<String>,
    pub max_rows: Option<u64>,
}

/// Row count for one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayBucket {
    pub day: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub table: TableName,
    pub date_column: String,
    /// Newest day first
    pub buckets: Vec<DayBucket>,
    pub selected_day: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

/// Response from listing tables
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablesResponse {
    pub tables: Vec<TableName>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewsResponse {
    pub views: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProceduresResponse {
    pub procedures: Vec<ProcedureDescriptor>,
}
