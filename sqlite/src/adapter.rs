//! Statement adapter between callers and the SQLite engine.
//!
//! Callers hand parameters over in whatever shape is natural at the call
//! site, and get rows back as plain records:
//!
//! - no parameters: `()`
//! - a list: `vec![...]`, `[...]`, a JSON array, or several values via
//!   [`args!`](crate::args)
//! - named fields: a JSON object or [`Params::named`]
//! - a single scalar: `"w1"`, `42`, `true`, ...
//!
//! Named fields are re-keyed into SQLite's placeholder syntax: a field `id`
//! binds the first of `:id`, `@id` or `$id` present in the statement. Fields
//! already carrying a prefix bind verbatim; fields with no placeholder are
//! ignored and unbound placeholders are `NULL`.

use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::types::{FromSql, Value, ValueRef};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::Result;
use crate::handle::TenantHandle;

/// Prefixes SQLite accepts for named placeholders.
const NAMED_PREFIXES: [char; 3] = [':', '@', '$'];

/// Conversion of a Rust value into an engine value.
pub trait IntoValue {
    /// Converts `self` into a [`Value`].
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl IntoValue for &[u8] {
    fn into_value(self) -> Value {
        Value::Blob(self.to_vec())
    }
}

impl IntoValue for serde_json::Value {
    fn into_value(self) -> Value {
        json_to_value(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map_or(Value::Null, IntoValue::into_value)
    }
}

macro_rules! into_value_via_from {
    ($($ty:ty),*) => {
        $(
            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::from(self)
                }
            }
        )*
    };
}

into_value_via_from!(String, Vec<u8>, bool, i8, i16, i32, i64, u8, u16, u32, f32, f64);

/// Converts a JSON value into an engine value.
///
/// Booleans become `0`/`1`; numbers become integers when they fit `i64`,
/// reals otherwise; nested arrays and objects are stored as JSON text.
pub fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Null, Value::Real),
        },
        serde_json::Value::String(s) => Value::Text(s),
        nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            Value::Text(nested.to_string())
        }
    }
}

/// Converts an engine value into JSON. Blobs become arrays of bytes.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::from(b.clone()),
    }
}

/// Normalized statement parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// Nothing to bind.
    #[default]
    None,
    /// Values bound to `?1`, `?2`, ... in order.
    Positional(Vec<Value>),
    /// Values bound by placeholder name.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Builds positional parameters from any list of convertible values.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: IntoValue,
    {
        Self::Positional(values.into_iter().map(IntoValue::into_value).collect())
    }

    /// Builds named parameters from `(field, value)` pairs.
    pub fn named<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoValue,
    {
        Self::Named(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into_value()))
                .collect(),
        )
    }

    /// Returns `true` if there is nothing to bind.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::None => true,
            Self::Positional(values) => values.is_empty(),
            Self::Named(fields) => fields.is_empty(),
        }
    }

    /// Binds these parameters onto a compiled statement.
    pub(crate) fn bind(&self, stmt: &mut rusqlite::Statement<'_>) -> Result<()> {
        match self {
            Self::None => {}
            Self::Positional(values) => {
                for (i, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(i + 1, value)?;
                }
            }
            Self::Named(fields) => {
                for (name, value) in fields {
                    if let Some(idx) = named_index(stmt, name)? {
                        stmt.raw_bind_parameter(idx, value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Resolves a field name to a placeholder index.
fn named_index(stmt: &rusqlite::Statement<'_>, name: &str) -> Result<Option<usize>> {
    if name.starts_with(|c: char| NAMED_PREFIXES.contains(&c)) {
        return Ok(stmt.parameter_index(name)?);
    }
    for prefix in NAMED_PREFIXES {
        if let Some(idx) = stmt.parameter_index(&format!("{prefix}{name}"))? {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl<T: IntoValue> From<Vec<T>> for Params {
    fn from(values: Vec<T>) -> Self {
        Self::positional(values)
    }
}

impl<T: IntoValue, const N: usize> From<[T; N]> for Params {
    fn from(values: [T; N]) -> Self {
        Self::positional(values)
    }
}

/// Objects bind by name, arrays by position, anything else as one value.
impl From<serde_json::Value> for Params {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self::named(map),
            serde_json::Value::Array(items) => Self::positional(items),
            scalar => Self::Positional(vec![json_to_value(scalar)]),
        }
    }
}

macro_rules! params_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Params {
                fn from(value: $ty) -> Self {
                    Self::Positional(vec![value.into_value()])
                }
            }
        )*
    };
}

params_from_scalar!(Value, &str, &String, String, bool, i32, i64, u32, f64);

/// Builds positional [`Params`] from a list of heterogeneous values.
///
/// # Examples
///
/// ```
/// use tenantdb_sqlite::{Params, args};
/// use rusqlite::types::Value;
///
/// let params = args!["w1", 3, None::<i64>];
/// assert_eq!(
///     params,
///     Params::Positional(vec![Value::Text("w1".into()), Value::Integer(3), Value::Null])
/// );
/// assert_eq!(args![], Params::None);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::IntoValue::into_value($value)),+])
    };
}

/// One result row as an ordered `column -> value` record.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in result order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` for a zero-column row.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value of `column`, or `None` if there is no such column.
    ///
    /// With duplicate column names the first one wins.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Converts the value of `column` into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`rusqlite::Error::InvalidColumnName`] for an unknown column
    /// and [`rusqlite::Error::FromSqlConversionFailure`] if the value does
    /// not convert.
    pub fn get_as<T: FromSql>(&self, column: &str) -> Result<T> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| rusqlite::Error::InvalidColumnName(column.to_string()))?;
        let value = &self.values[idx];
        T::column_result(ValueRef::from(value)).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e)).into()
        })
    }

    /// Iterates `(column, value)` pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Converts the row into a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(column, value)| (column.to_string(), value_to_json(value)))
                .collect(),
        )
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, &value_to_json(value))?;
        }
        map.end()
    }
}

/// Effect of the most recent [`Statement::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunInfo {
    /// Rows changed by the statement.
    pub changes: u64,
    /// Rowid of the most recent successful insert on the connection.
    pub last_insert_rowid: i64,
}

/// Executes `sql` for effect, draining any rows it produces.
pub(crate) fn execute(conn: &Connection, sql: &str, params: &Params) -> Result<RunInfo> {
    let mut stmt = conn.prepare_cached(sql)?;
    params.bind(&mut stmt)?;
    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    drop(rows);
    Ok(RunInfo {
        changes: conn.changes(),
        last_insert_rowid: conn.last_insert_rowid(),
    })
}

/// Runs `sql` and maps up to `limit` rows into records, in engine order.
pub(crate) fn query(
    conn: &Connection,
    sql: &str,
    params: &Params,
    limit: Option<usize>,
) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    params.bind(&mut stmt)?;
    let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|idx| row.get_ref(idx).map(Value::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(Row {
            columns: Arc::clone(&columns),
            values,
        });
        if limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
    }
    Ok(out)
}

/// A reusable statement bound to one SQL string and one tenant handle.
///
/// Compiled statements are cached per connection, so re-running a
/// `Statement` does not recompile it.
///
/// # Examples
///
/// ```no_run
/// use tenantdb_sqlite::{TenantRegistry, args};
/// use tenantdb_core::TenantDbConfig;
///
/// let registry = TenantRegistry::new(TenantDbConfig::new("data", "migrations")).unwrap();
/// let acme = registry.get_connection("acme").unwrap();
///
/// acme.prepare("INSERT INTO widgets (id) VALUES (?)").unwrap()
///     .run("w1").unwrap()
///     .run("w2").unwrap();
///
/// let rows = acme.prepare("SELECT id FROM widgets ORDER BY id").unwrap().all(()).unwrap();
/// assert_eq!(rows.len(), 2);
/// ```
pub struct Statement<'h> {
    handle: &'h TenantHandle,
    sql: String,
    info: RunInfo,
}

impl<'h> Statement<'h> {
    pub(crate) fn new(handle: &'h TenantHandle, sql: &str) -> Self {
        Self {
            handle,
            sql: sql.to_string(),
            info: RunInfo::default(),
        }
    }

    /// SQL text of this statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Outcome of the last [`run`](Self::run).
    pub fn info(&self) -> RunInfo {
        self.info
    }

    /// Executes for effect, then persists the tenant database.
    ///
    /// Returns `self` so calls can be chained. Row data is discarded; use
    /// [`get`](Self::get) or [`all`](Self::all) to read.
    pub fn run(&mut self, params: impl Into<Params>) -> Result<&mut Self> {
        let params = params.into();
        self.info = self
            .handle
            .write(|conn| execute(conn, &self.sql, &params))?;
        Ok(self)
    }

    /// Returns the first row, or `None` if the statement produced no rows.
    pub fn get(&self, params: impl Into<Params>) -> Result<Option<Row>> {
        let params = params.into();
        let rows = self
            .handle
            .with_connection(|conn| query(conn, &self.sql, &params, Some(1)))?;
        Ok(rows.into_iter().next())
    }

    /// Returns every row in the order the engine produced them.
    pub fn all(&self, params: impl Into<Params>) -> Result<Vec<Row>> {
        let params = params.into();
        self.handle
            .with_connection(|conn| query(conn, &self.sql, &params, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE widgets (id TEXT PRIMARY KEY, label TEXT, qty INTEGER, price REAL, raw BLOB);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_params_normalization() {
        assert_eq!(Params::from(()), Params::None);
        assert_eq!(
            Params::from(vec!["a", "b"]),
            Params::Positional(vec![Value::Text("a".into()), Value::Text("b".into())])
        );
        assert_eq!(Params::from("w1"), Params::Positional(vec![Value::Text("w1".into())]));
        assert_eq!(Params::from(7_i64), Params::Positional(vec![Value::Integer(7)]));
        assert_eq!(
            Params::from(json!({"id": "w1"})),
            Params::Named(vec![("id".to_string(), Value::Text("w1".into()))])
        );
        assert_eq!(
            Params::from(json!(["w1", 2, true, null])),
            Params::Positional(vec![
                Value::Text("w1".into()),
                Value::Integer(2),
                Value::Integer(1),
                Value::Null,
            ])
        );
        assert_eq!(Params::from(json!(1.5)), Params::Positional(vec![Value::Real(1.5)]));
    }

    #[test]
    fn test_json_nested_values_become_text() {
        assert_eq!(
            json_to_value(json!({"a": [1, 2]})),
            Value::Text(r#"{"a":[1,2]}"#.to_string())
        );
    }

    #[test]
    fn test_positional_binding() {
        let conn = conn();
        let info = execute(
            &conn,
            "INSERT INTO widgets (id, qty) VALUES (?, ?)",
            &args!["w1", 3],
        )
        .unwrap();
        assert_eq!(info.changes, 1);

        let rows = query(&conn, "SELECT id, qty FROM widgets", &Params::None, None).unwrap();
        assert_eq!(rows[0].to_json(), json!({"id": "w1", "qty": 3}));
    }

    #[test]
    fn test_named_binding_with_each_prefix() {
        let conn = conn();
        for (sql, id) in [
            ("INSERT INTO widgets (id, label) VALUES (:id, :label)", "colon"),
            ("INSERT INTO widgets (id, label) VALUES (@id, @label)", "at"),
            ("INSERT INTO widgets (id, label) VALUES ($id, $label)", "dollar"),
        ] {
            execute(&conn, sql, &Params::from(json!({"id": id, "label": "x", "unused": 1}))).unwrap();
        }

        let rows = query(&conn, "SELECT id FROM widgets ORDER BY id", &Params::None, None).unwrap();
        let ids: Vec<String> = rows.iter().map(|r| r.get_as("id").unwrap()).collect();
        assert_eq!(ids, vec!["at", "colon", "dollar"]);
    }

    #[test]
    fn test_named_binding_with_explicit_prefix() {
        let conn = conn();
        execute(
            &conn,
            "INSERT INTO widgets (id) VALUES (:id)",
            &Params::named([(":id", "w9")]),
        )
        .unwrap();
        let row = query(&conn, "SELECT id FROM widgets", &Params::None, Some(1))
            .unwrap()
            .remove(0);
        assert_eq!(row.get("id"), Some(&Value::Text("w9".into())));
    }

    #[test]
    fn test_missing_named_field_binds_null() {
        let conn = conn();
        execute(
            &conn,
            "INSERT INTO widgets (id, label) VALUES (:id, :label)",
            &Params::named([("id", "w1")]),
        )
        .unwrap();
        let rows = query(&conn, "SELECT label FROM widgets", &Params::None, None).unwrap();
        assert_eq!(rows[0].get("label"), Some(&Value::Null));
    }

    #[test]
    fn test_too_many_positional_params_is_an_error() {
        let conn = conn();
        assert!(execute(&conn, "INSERT INTO widgets (id) VALUES (?)", &args!["a", "b"]).is_err());
    }

    #[test]
    fn test_query_preserves_engine_order_and_limit() {
        let conn = conn();
        for id in ["c", "a", "b"] {
            execute(&conn, "INSERT INTO widgets (id) VALUES (?)", &Params::from(id)).unwrap();
        }
        let ordered = query(&conn, "SELECT id FROM widgets ORDER BY id DESC", &Params::None, None)
            .unwrap();
        let ids: Vec<_> = ordered.iter().map(|r| r.to_json()["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("b"), json!("a")]);

        let first = query(&conn, "SELECT id FROM widgets ORDER BY id", &Params::None, Some(1))
            .unwrap();
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn test_execute_tolerates_returning_rows() {
        let conn = conn();
        let info = execute(
            &conn,
            "INSERT INTO widgets (id) VALUES (?) RETURNING id",
            &Params::from("r1"),
        )
        .unwrap();
        assert_eq!(info.changes, 1);
        assert!(info.last_insert_rowid > 0);
    }

    #[test]
    fn test_row_accessors_and_serialize() {
        let conn = conn();
        execute(
            &conn,
            "INSERT INTO widgets (id, label, qty, price, raw) VALUES (?, ?, ?, ?, ?)",
            &args!["w1", None::<String>, 2, 9.5, vec![1_u8, 2]],
        )
        .unwrap();
        let row = query(&conn, "SELECT * FROM widgets", &Params::None, None)
            .unwrap()
            .remove(0);

        assert_eq!(row.columns(), ["id", "label", "qty", "price", "raw"]);
        assert_eq!(row.len(), 5);
        assert_eq!(row.get_as::<i64>("qty").unwrap(), 2);
        assert_eq!(row.get_as::<Option<String>>("label").unwrap(), None);
        assert!(row.get_as::<i64>("id").is_err());
        assert!(row.get_as::<i64>("nope").is_err());
        assert!(row.get("nope").is_none());

        let expected = json!({"id": "w1", "label": null, "qty": 2, "price": 9.5, "raw": [1, 2]});
        assert_eq!(row.to_json(), expected);
        assert_eq!(serde_json::to_value(&row).unwrap(), expected);
    }
}
