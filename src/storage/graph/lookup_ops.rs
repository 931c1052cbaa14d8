use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::trace;

use crate::storage::context::{AliasCtx, NameCtx};
use crate::storage::mvcc::{self, VersionedKind};
use crate::storage::records::{
    AliasKind, AliasLookupKey, AliasLookupKind, PhoneticKey, PhoneticLookupKind, PrefixKey,
    PrefixLookupKind,
};
use crate::storage::txn::{TxView, WriteTx};
use crate::types::{ContextId, EntityId, Flags, Result, SedimentError};

use super::graph_types::NameMatch;
use super::helpers::{ctx_param, id_param, text_param};
use super::Graph;

/// Smallest string greater than every string starting with `prefix`, or
/// `None` when no such bound exists. SQLite compares text bytewise and UTF-8
/// preserves code point order, so this closes a prefix range scan.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = (u32::from(last) + 1..=u32::from(char::MAX)).find_map(char::from_u32);
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

impl Graph {
    fn alias_lookup_key(&self, ctx: ContextId, value: &str) -> AliasLookupKey {
        AliasLookupKey {
            digest: self.digest.digest(ctx, value),
            ctx,
        }
    }

    pub(crate) fn index_alias(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: ContextId,
        value: &str,
        flags: Flags,
    ) -> Result<()> {
        let key = self.alias_lookup_key(ctx, value);
        mvcc::create::<AliasLookupKind>(tx, &key, base_id, flags)?;
        Ok(())
    }

    pub(crate) fn unindex_alias(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: ContextId,
        value: &str,
    ) -> Result<usize> {
        let key = self.alias_lookup_key(ctx, value);
        mvcc::tombstone_matching(
            tx,
            AliasLookupKind::TABLE,
            "hash = ? AND ctx = ? AND base_id = ?",
            vec![Value::Blob(key.digest.to_vec()), ctx_param(ctx), id_param(base_id)],
        )
    }

    pub(crate) fn reflag_alias_index(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: ContextId,
        value: &str,
        add: Flags,
        clear: Flags,
    ) -> Result<usize> {
        let key = self.alias_lookup_key(ctx, value);
        mvcc::update_flags_matching::<AliasLookupKind>(
            tx,
            "hash = ? AND ctx = ? AND base_id = ?",
            vec![Value::Blob(key.digest.to_vec()), ctx_param(ctx), id_param(base_id)],
            add,
            clear,
        )
    }

    pub(crate) fn index_name(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        value: &str,
        flags: Flags,
    ) -> Result<()> {
        if ctx.search().prefix() {
            let chars = value.chars().count();
            for &plen in &self.prefix_lengths {
                if (plen as usize) >= chars {
                    continue;
                }
                let key = PrefixKey {
                    ctx: ctx.id(),
                    base_id,
                    value: value.to_owned(),
                    plen,
                };
                let prefix: String = value.chars().take(plen as usize).collect();
                mvcc::create::<PrefixLookupKind>(tx, &key, prefix, flags)?;
            }
            let full = PrefixKey {
                ctx: ctx.id(),
                base_id,
                value: value.to_owned(),
                plen: 0,
            };
            mvcc::create::<PrefixLookupKind>(tx, &full, value.to_owned(), flags)?;
        }
        if ctx.search().phonetic() {
            for code in self.phonetic.encode(value).indexed(ctx.loose()) {
                let key = PhoneticKey {
                    ctx: ctx.id(),
                    base_id,
                    value: value.to_owned(),
                    code,
                };
                mvcc::create::<PhoneticLookupKind>(tx, &key, (), flags)?;
            }
        }
        Ok(())
    }

    pub(crate) fn unindex_name(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        value: &str,
    ) -> Result<usize> {
        let params = || vec![ctx_param(ctx.id()), id_param(base_id), text_param(value)];
        let filter = "ctx = ? AND base_id = ? AND value = ?";
        let mut removed = mvcc::tombstone_matching(tx, "prefix_lookup", filter, params())?;
        removed += mvcc::tombstone_matching(tx, "phonetic_lookup", filter, params())?;
        Ok(removed)
    }

    pub(crate) fn reflag_name_index(
        &self,
        tx: &mut WriteTx<'_>,
        base_id: EntityId,
        ctx: NameCtx,
        value: &str,
        add: Flags,
        clear: Flags,
    ) -> Result<usize> {
        let params = || vec![ctx_param(ctx.id()), id_param(base_id), text_param(value)];
        let filter = "ctx = ? AND base_id = ? AND value = ?";
        let mut changed =
            mvcc::update_flags_matching::<PrefixLookupKind>(tx, filter, params(), add, clear)?;
        changed +=
            mvcc::update_flags_matching::<PhoneticLookupKind>(tx, filter, params(), add, clear)?;
        Ok(changed)
    }

    /// Resolves an alias value to the entity holding it.
    ///
    /// The digest index is probed first; the stored alias is then compared
    /// with `value`, so a digest collision resolves to `None`.
    pub fn lookup_alias(
        &self,
        tx: &impl TxView,
        ctx: AliasCtx,
        value: &str,
    ) -> Result<Option<EntityId>> {
        let key = self.alias_lookup_key(ctx.id(), value);
        let Some(row) = mvcc::get_current::<AliasLookupKind, _>(tx, &key)? else {
            tx.metrics().lookup("alias", false);
            return Ok(None);
        };
        let base_id = row.fields;
        let confirmed = mvcc::scan_current::<AliasKind, _>(
            tx,
            "base_id = ? AND ctx = ? AND value = ?",
            vec![id_param(base_id), ctx_param(ctx.id()), text_param(value)],
            "pos",
            Some(1),
        )?;
        let hit = !confirmed.is_empty();
        if !hit {
            trace!(ctx = %ctx.id(), entity = %base_id, "alias digest matched a different value");
        }
        tx.metrics().lookup("alias", hit);
        Ok(hit.then_some(base_id))
    }

    /// Names in `ctx` starting with `query`, ordered by `(value, base_id)`.
    ///
    /// Pass the last match of the previous page as `after` to continue.
    pub fn search_prefix(
        &self,
        tx: &impl TxView,
        ctx: NameCtx,
        query: &str,
        limit: usize,
        after: Option<&NameMatch>,
    ) -> Result<Vec<NameMatch>> {
        if !ctx.search().prefix() {
            return Err(SedimentError::BadContext {
                ctx: ctx.id(),
                expected: "prefix-searchable name",
            });
        }
        if query.is_empty() {
            return Err(SedimentError::Invalid("empty search query"));
        }
        let qlen = query.chars().count() as u32;
        let (mut filter, mut params) = if self.prefix_lengths.contains(&qlen) {
            (
                "ctx = ? AND ((plen = ? AND prefix = ?) OR (plen = 0 AND prefix = ?))".to_owned(),
                vec![
                    ctx_param(ctx.id()),
                    Value::Integer(i64::from(qlen)),
                    text_param(query),
                    text_param(query),
                ],
            )
        } else {
            match prefix_upper_bound(query) {
                Some(upper) => (
                    "ctx = ? AND plen = 0 AND prefix >= ? AND prefix < ?".to_owned(),
                    vec![ctx_param(ctx.id()), text_param(query), Value::Text(upper)],
                ),
                None => (
                    "ctx = ? AND plen = 0 AND prefix >= ?".to_owned(),
                    vec![ctx_param(ctx.id()), text_param(query)],
                ),
            }
        };
        if let Some(after) = after {
            filter.push_str(" AND (value > ? OR (value = ? AND base_id > ?))");
            params.push(text_param(&after.value));
            params.push(text_param(&after.value));
            params.push(id_param(after.base_id));
        }
        let rows = mvcc::scan_current::<PrefixLookupKind, _>(
            tx,
            &filter,
            params,
            "value, base_id",
            Some(limit),
        )?;
        tx.metrics().lookup("prefix", !rows.is_empty());
        Ok(rows
            .into_iter()
            .map(|(key, _)| NameMatch {
                value: key.value,
                base_id: key.base_id,
            })
            .collect())
    }

    /// Names in `ctx` that sound like `query`, ordered by `(value, base_id)`.
    ///
    /// A name matching on both its primary and alternate code is listed
    /// once. Pass the last match of the previous page as `after` to
    /// continue.
    pub fn search_phonetic(
        &self,
        tx: &impl TxView,
        ctx: NameCtx,
        query: &str,
        limit: usize,
        after: Option<&NameMatch>,
    ) -> Result<Vec<NameMatch>> {
        if !ctx.search().phonetic() {
            return Err(SedimentError::BadContext {
                ctx: ctx.id(),
                expected: "phonetic-searchable name",
            });
        }
        let codes = self.phonetic.encode(query).indexed(ctx.loose());
        if codes.is_empty() {
            tx.metrics().lookup("phonetic", false);
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; codes.len()].join(", ");
        let mut sql = format!(
            "SELECT DISTINCT value, base_id FROM phonetic_lookup \
             WHERE time_removed IS NULL AND ctx = ? AND code IN ({placeholders})"
        );
        let mut params = vec![ctx_param(ctx.id())];
        params.extend(codes.into_iter().map(Value::Text));
        if let Some(after) = after {
            sql.push_str(" AND (value > ? OR (value = ? AND base_id > ?))");
            params.push(text_param(&after.value));
            params.push(text_param(&after.value));
            params.push(id_param(after.base_id));
        }
        sql.push_str(" ORDER BY value, base_id LIMIT ?");
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let mut stmt = tx.conn().prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            matches.push(NameMatch {
                value: row.get(0)?,
                base_id: EntityId::from_sql(row.get(1)?),
            });
        }
        tx.metrics().lookup("phonetic", !matches.is_empty());
        Ok(matches)
    }
}
