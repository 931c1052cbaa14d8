//! Row versioning protocol shared by every table.
//!
//! A logical key owns a sequence of row versions. At most one of them is
//! current (`time_removed IS NULL`); the store's partial unique indexes
//! enforce that, and this module maps their violations to
//! [`SedimentError::UniquenessViolation`]. Payload columns are never updated
//! in place and rows are never deleted: a change tombstones the current row
//! and inserts its replacement inside the caller's transaction.

use std::fmt;

use rusqlite::types::Value;
use rusqlite::{ffi, params_from_iter};
use tracing::{trace, warn};

use crate::storage::txn::sealed::Sealed;
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{Flags, Result, SedimentError, Timestamp};

/// Number of bookkeeping columns preceding the key columns in every select.
pub(crate) const HEADER_COLUMNS: usize = 4;

/// Lifecycle state of one row version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionState {
    /// Live version of its key.
    Current,
    /// Superseded or removed at the given time.
    Tombstoned(Timestamp),
}

/// Lifecycle state of a logical key, derived from its history.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyState {
    /// No version was ever written.
    Absent,
    /// The newest version is live.
    Current,
    /// Versions exist but none is live.
    Tombstoned,
}

impl KeyState {
    /// Derives the key state from its version history.
    pub fn of<T>(history: &History<T>) -> KeyState {
        if history.is_empty() {
            KeyState::Absent
        } else if history.current().is_some() {
            KeyState::Current
        } else {
            KeyState::Tombstoned
        }
    }
}

/// One stored version.
#[derive(Clone, Debug, PartialEq)]
pub struct Row<T> {
    /// SQLite rowid; increases with write order.
    pub row_id: i64,
    /// Flags carried by this version.
    pub flags: Flags,
    /// Payload.
    pub fields: T,
    /// Creation time.
    pub time_created: Timestamp,
    /// Tombstone time, `None` while current.
    pub time_removed: Option<Timestamp>,
}

impl<T> Row<T> {
    /// Returns the lifecycle state of this version.
    pub fn state(&self) -> VersionState {
        match self.time_removed {
            None => VersionState::Current,
            Some(at) => VersionState::Tombstoned(at),
        }
    }

    /// Returns `true` if this version is live.
    pub fn is_current(&self) -> bool {
        self.time_removed.is_none()
    }

    /// Replaces the payload, keeping the version metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Row<U> {
        Row {
            row_id: self.row_id,
            flags: self.flags,
            fields: f(self.fields),
            time_created: self.time_created,
            time_removed: self.time_removed,
        }
    }
}

/// All versions of one key, oldest first.
///
/// The sequence is finite and can be walked any number of times.
#[derive(Clone, Debug, PartialEq)]
pub struct History<T> {
    rows: Vec<Row<T>>,
}

impl<T> History<T> {
    pub(crate) fn new(rows: Vec<Row<T>>) -> Self {
        Self { rows }
    }

    /// Iterates versions in write order.
    pub fn iter(&self) -> std::slice::Iter<'_, Row<T>> {
        self.rows.iter()
    }

    /// Number of versions.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the key was never written.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The live version, if any.
    pub fn current(&self) -> Option<&Row<T>> {
        self.rows.last().filter(|row| row.is_current())
    }

    /// Lifecycle state of the key.
    pub fn state(&self) -> KeyState {
        KeyState::of(self)
    }

    /// Replaces every payload.
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> History<U> {
        History {
            rows: self.rows.into_iter().map(|row| row.map(&mut f)).collect(),
        }
    }
}

impl<T> IntoIterator for History<T> {
    type Item = Row<T>;
    type IntoIter = std::vec::IntoIter<Row<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a History<T> {
    type Item = &'a Row<T>;
    type IntoIter = std::slice::Iter<'a, Row<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Outcome of a removal.
#[must_use]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Removal {
    /// The current row was tombstoned.
    Tombstoned,
    /// There was no current row.
    AlreadyAbsent,
}

impl Removal {
    /// Returns `true` if a row was tombstoned.
    pub fn removed(self) -> bool {
        self == Removal::Tombstoned
    }
}

/// Table description consumed by the generic protocol functions.
///
/// Selects always read `rowid, flags, time_created, time_removed`, then
/// [`Self::KEY_COLUMNS`], then [`Self::FIELD_COLUMNS`].
pub trait VersionedKind {
    /// Table name.
    const TABLE: &'static str;
    /// Noun used in `NotFound` errors.
    const NOUN: &'static str;
    /// Columns identifying the logical key.
    const KEY_COLUMNS: &'static [&'static str];
    /// Payload columns.
    const FIELD_COLUMNS: &'static [&'static str];

    /// Logical key.
    type Key: Clone + fmt::Debug;
    /// Payload.
    type Fields: Clone + fmt::Debug;

    /// SQL values for [`Self::KEY_COLUMNS`].
    fn key_values(key: &Self::Key) -> Vec<Value>;
    /// SQL values for [`Self::FIELD_COLUMNS`].
    fn field_values(fields: &Self::Fields) -> Vec<Value>;
    /// Decodes the key starting at column `at`.
    fn read_key(row: &rusqlite::Row<'_>, at: usize) -> Result<Self::Key>;
    /// Decodes the payload starting at column `at`.
    fn read_fields(row: &rusqlite::Row<'_>, at: usize) -> Result<Self::Fields>;
}

fn select_list<K: VersionedKind>() -> String {
    let mut cols = vec!["rowid", "flags", "time_created", "time_removed"];
    cols.extend_from_slice(K::KEY_COLUMNS);
    cols.extend_from_slice(K::FIELD_COLUMNS);
    cols.join(", ")
}

fn key_filter<K: VersionedKind>() -> String {
    K::KEY_COLUMNS
        .iter()
        .map(|col| format!("{col} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn read_row<K: VersionedKind>(row: &rusqlite::Row<'_>) -> Result<(K::Key, Row<K::Fields>)> {
    let key = K::read_key(row, HEADER_COLUMNS)?;
    let fields = K::read_fields(row, HEADER_COLUMNS + K::KEY_COLUMNS.len())?;
    Ok((
        key,
        Row {
            row_id: row.get(0)?,
            flags: Flags(row.get(1)?),
            fields,
            time_created: Timestamp(row.get(2)?),
            time_removed: row.get::<_, Option<i64>>(3)?.map(Timestamp),
        },
    ))
}

fn query_rows<K: VersionedKind, T: TxView>(
    tx: &T,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<(K::Key, Row<K::Fields>)>> {
    let mut stmt = tx.conn().prepare_cached(sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(read_row::<K>(row)?);
    }
    Ok(out)
}

/// Maps constraint failures of a write on `table` to domain errors.
pub(crate) fn map_write_error(
    err: rusqlite::Error,
    table: &'static str,
    describe: impl FnOnce() -> String,
) -> SedimentError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                let mut detail = describe();
                if let Some(message) = message {
                    detail.push_str(" (");
                    detail.push_str(message);
                    detail.push(')');
                }
                return SedimentError::UniquenessViolation { table, detail };
            }
            ffi::SQLITE_CONSTRAINT_CHECK => {
                return SedimentError::InvalidAttributeShape("row rejected by check constraint");
            }
            _ => {}
        }
    }
    err.into()
}

/// Returns the current version of `key`.
pub fn get_current<K: VersionedKind, T: TxView>(
    tx: &T,
    key: &K::Key,
) -> Result<Option<Row<K::Fields>>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} AND time_removed IS NULL",
        select_list::<K>(),
        K::TABLE,
        key_filter::<K>()
    );
    let mut rows = query_rows::<K, T>(tx, &sql, K::key_values(key))?;
    if rows.len() > 1 {
        return Err(SedimentError::Corruption(format!(
            "{} rows current for {} key {:?}",
            rows.len(),
            K::TABLE,
            key
        )));
    }
    Ok(rows.pop().map(|(_, row)| row))
}

/// Returns every version of `key` in write order.
pub fn history<K: VersionedKind, T: TxView>(tx: &T, key: &K::Key) -> Result<History<K::Fields>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY rowid",
        select_list::<K>(),
        K::TABLE,
        key_filter::<K>()
    );
    let rows = query_rows::<K, T>(tx, &sql, K::key_values(key))?;
    Ok(History::new(rows.into_iter().map(|(_, row)| row).collect()))
}

/// Returns current rows matching `filter`, ordered by `order_by`.
///
/// `filter` is a SQL boolean expression over the table's columns using `?`
/// placeholders bound from `params`.
pub(crate) fn scan_current<K: VersionedKind, T: TxView>(
    tx: &T,
    filter: &str,
    mut params: Vec<Value>,
    order_by: &str,
    limit: Option<usize>,
) -> Result<Vec<(K::Key, Row<K::Fields>)>> {
    let mut sql = format!(
        "SELECT {} FROM {} WHERE time_removed IS NULL AND ({filter}) ORDER BY {order_by}",
        select_list::<K>(),
        K::TABLE,
    );
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }
    query_rows::<K, T>(tx, &sql, params)
}

/// Inserts a new current version of `key` created at `at`.
pub(crate) fn insert_at<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    key: &K::Key,
    fields: K::Fields,
    flags: Flags,
    at: Timestamp,
) -> Result<Row<K::Fields>> {
    let mut cols = vec!["flags", "time_created"];
    cols.extend_from_slice(K::KEY_COLUMNS);
    cols.extend_from_slice(K::FIELD_COLUMNS);
    let placeholders = vec!["?"; cols.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        K::TABLE,
        cols.join(", ")
    );
    let mut params = vec![Value::Integer(i64::from(flags.0)), Value::Integer(at.0)];
    params.extend(K::key_values(key));
    params.extend(K::field_values(&fields));

    let conn = tx.conn();
    let result = conn
        .prepare_cached(&sql)
        .and_then(|mut stmt| stmt.execute(params_from_iter(params)));
    if let Err(err) = result {
        let err = map_write_error(err, K::TABLE, || format!("{key:?}"));
        if err.is_conflict() {
            tx.metrics().uniqueness_conflict(K::TABLE);
            warn!(table = K::TABLE, key = ?key, "uniqueness conflict");
        }
        return Err(err);
    }
    let row_id = conn.last_insert_rowid();
    tx.metrics().row_written(K::TABLE);
    trace!(table = K::TABLE, row_id, key = ?key, "row inserted");
    Ok(Row {
        row_id,
        flags,
        fields,
        time_created: at,
        time_removed: None,
    })
}

/// Inserts the first version of `key`; fails if a current row exists.
pub fn create<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    key: &K::Key,
    fields: K::Fields,
    flags: Flags,
) -> Result<Row<K::Fields>> {
    let now = tx.now();
    insert_at::<K>(tx, key, fields, flags, now)
}

fn tombstone_row(tx: &mut WriteTx<'_>, table: &'static str, row_id: i64, at: Timestamp) -> Result<()> {
    let sql = format!("UPDATE {table} SET time_removed = ? WHERE rowid = ? AND time_removed IS NULL");
    let changed = tx.conn().prepare_cached(&sql)?.execute((at.0, row_id))?;
    if changed != 1 {
        return Err(SedimentError::Corruption(format!(
            "{table} row {row_id} was not current when tombstoned"
        )));
    }
    tx.metrics().rows_tombstoned(table, 1);
    Ok(())
}

/// Tombstones `prior` and inserts its replacement under `key`.
///
/// `key` may differ from the prior row's key; shifting list entries moves a
/// row to a new position this way.
pub(crate) fn supersede<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    prior: &Row<K::Fields>,
    key: &K::Key,
    fields: K::Fields,
    flags: Flags,
) -> Result<Row<K::Fields>> {
    let at = tx.now().max(prior.time_created);
    tombstone_row(tx, K::TABLE, prior.row_id, at)?;
    insert_at::<K>(tx, key, fields, flags, at)
}

fn check_expected<K: VersionedKind>(
    current: Option<&Row<K::Fields>>,
    expected: Option<&K::Fields>,
) -> Result<()>
where
    K::Fields: PartialEq,
{
    match expected {
        Some(expected) if current.map(|row| &row.fields) != Some(expected) => {
            Err(SedimentError::ValueMismatch(K::NOUN))
        }
        _ => Ok(()),
    }
}

/// Writes a new current version of `key`, tombstoning the previous one.
///
/// A replaced version passes its flags on; `flags` applies only when the key
/// has no current row. With `expected`, the write happens only if the
/// current payload equals it, and fails with
/// [`SedimentError::ValueMismatch`] otherwise (an absent key never matches).
pub fn put<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    key: &K::Key,
    fields: K::Fields,
    flags: Flags,
    expected: Option<&K::Fields>,
) -> Result<Row<K::Fields>>
where
    K::Fields: PartialEq,
{
    tx.atomic(|tx| {
        let prior = get_current::<K, _>(&*tx, key)?;
        check_expected::<K>(prior.as_ref(), expected)?;
        match prior {
            Some(prior) => {
                let flags = prior.flags;
                supersede::<K>(tx, &prior, key, fields, flags)
            }
            None => create::<K>(tx, key, fields, flags),
        }
    })
}

/// Tombstones the current version of `key` if its payload equals
/// `expected`.
///
/// An absent key reports [`Removal::AlreadyAbsent`]; a different payload
/// fails with [`SedimentError::ValueMismatch`] and changes nothing.
pub fn remove_if<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    key: &K::Key,
    expected: &K::Fields,
) -> Result<Removal>
where
    K::Fields: PartialEq,
{
    let Some(current) = get_current::<K, _>(&*tx, key)? else {
        return Ok(Removal::AlreadyAbsent);
    };
    check_expected::<K>(Some(&current), Some(expected))?;
    let at = tx.now().max(current.time_created);
    tombstone_row(tx, K::TABLE, current.row_id, at)?;
    trace!(table = K::TABLE, key = ?key, "row tombstoned");
    Ok(Removal::Tombstoned)
}

/// Tombstones the current version of `key`.
pub fn remove<K: VersionedKind>(tx: &mut WriteTx<'_>, key: &K::Key) -> Result<Removal> {
    let sql = format!(
        "UPDATE {} SET time_removed = max(?, time_created) WHERE {} AND time_removed IS NULL",
        K::TABLE,
        key_filter::<K>()
    );
    let mut params = vec![Value::Integer(tx.now().0)];
    params.extend(K::key_values(key));
    let changed = tx
        .conn()
        .prepare_cached(&sql)?
        .execute(params_from_iter(params))?;
    match changed {
        0 => Ok(Removal::AlreadyAbsent),
        1 => {
            tx.metrics().rows_tombstoned(K::TABLE, 1);
            trace!(table = K::TABLE, key = ?key, "row tombstoned");
            Ok(Removal::Tombstoned)
        }
        n => Err(SedimentError::Corruption(format!(
            "{n} rows current for {} key {key:?}",
            K::TABLE
        ))),
    }
}

/// Versions the current row of `key` with `add` set and `clear` cleared.
pub fn update_flags<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    key: &K::Key,
    add: Flags,
    clear: Flags,
) -> Result<Row<K::Fields>> {
    let prior = get_current::<K, _>(&*tx, key)?.ok_or(SedimentError::NotFound(K::NOUN))?;
    let flags = prior.flags.apply(add, clear);
    if flags == prior.flags {
        return Ok(prior);
    }
    let fields = prior.fields.clone();
    supersede::<K>(tx, &prior, key, fields, flags)
}

/// Re-versions every current row matching `filter` with adjusted flags.
pub(crate) fn update_flags_matching<K: VersionedKind>(
    tx: &mut WriteTx<'_>,
    filter: &str,
    params: Vec<Value>,
    add: Flags,
    clear: Flags,
) -> Result<usize> {
    let rows = scan_current::<K, _>(&*tx, filter, params, "rowid", None)?;
    let mut changed = 0;
    for (key, row) in rows {
        let flags = row.flags.apply(add, clear);
        if flags != row.flags {
            let fields = row.fields.clone();
            supersede::<K>(tx, &row, &key, fields, flags)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Tombstones every current row of `table` matching `filter`.
pub(crate) fn tombstone_matching(
    tx: &mut WriteTx<'_>,
    table: &'static str,
    filter: &str,
    params: Vec<Value>,
) -> Result<usize> {
    let sql = format!(
        "UPDATE {table} SET time_removed = max(?, time_created) \
         WHERE time_removed IS NULL AND ({filter})"
    );
    let mut all = Vec::with_capacity(params.len() + 1);
    all.push(Value::Integer(tx.now().0));
    all.extend(params);
    let changed = tx
        .conn()
        .prepare_cached(&sql)?
        .execute(params_from_iter(all))?;
    if changed > 0 {
        tx.metrics().rows_tombstoned(table, changed as u64);
        trace!(table, changed, "rows tombstoned");
    }
    Ok(changed)
}
