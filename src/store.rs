//! Storage layout and transaction plumbing over the sled default tree.
//!
//! Every entity lives in the one default tree under a typed key prefix, so a
//! single `Tree::transaction` scope can cover any mix of entities that must
//! move together. All conditional updates (seat decrements, balance
//! mutations, pass flips) happen inside such a transaction; a read followed
//! by a separate write is never correct here.

use crate::error::Abort;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use tracing::error;

pub(crate) fn event_key(event_id: &str) -> String {
    format!("event/{event_id}")
}

pub(crate) fn booking_key(booking_id: &str) -> String {
    format!("booking/{booking_id}")
}

pub(crate) fn active_key(event_id: &str, guest_id: &str) -> String {
    format!(
        "active/{}",
        crate::utils::active_pair_digest(event_id, guest_id)
    )
}

pub(crate) fn pass_key(event_code: &str) -> String {
    format!("pass/{event_code}")
}

pub(crate) fn wallet_key(user_id: &str) -> String {
    format!("wallet/{user_id}")
}

/// History keys zero-pad the sequence number so a prefix scan yields rows in
/// insertion order.
pub(crate) fn history_key(user_id: &str, seq: u64) -> String {
    format!("hist/{user_id}/{seq:020}")
}

pub(crate) fn history_prefix(user_id: &str) -> String {
    format!("hist/{user_id}/")
}

pub(crate) fn withdrawal_key(withdrawal_id: &str) -> String {
    format!("wdr/{withdrawal_id}")
}

pub(crate) fn abort(e: impl Into<Abort>) -> ConflictableTransactionError<Abort> {
    ConflictableTransactionError::Abort(e.into())
}

pub(crate) fn codec_abort(e: impl std::fmt::Display) -> ConflictableTransactionError<Abort> {
    ConflictableTransactionError::Abort(Abort::Codec(e.to_string()))
}

/// Decode an entity out of the transactional tree, if present.
pub(crate) fn tx_get<T>(
    tx: &TransactionalTree,
    key: &str,
) -> Result<Option<T>, ConflictableTransactionError<Abort>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tx.get(key)? {
        Some(raw) => minicbor::decode(&raw).map(Some).map_err(codec_abort),
        None => Ok(None),
    }
}

/// Encode and write an entity inside the transaction.
pub(crate) fn tx_put<T>(
    tx: &TransactionalTree,
    key: &str,
    value: &T,
) -> Result<(), ConflictableTransactionError<Abort>>
where
    T: minicbor::Encode<()>,
{
    let bytes = minicbor::to_vec(value).map_err(codec_abort)?;
    tx.insert(key.as_bytes(), bytes)?;
    Ok(())
}

/// Run a closure as one serializable transaction and translate the outcome
/// back into the crate's error taxonomy. Invariant breaches are logged here,
/// at the single point where every aborted transaction surfaces.
pub(crate) fn run_txn<T>(
    db: &sled::Db,
    f: impl Fn(&TransactionalTree) -> Result<T, ConflictableTransactionError<Abort>>,
) -> anyhow::Result<T> {
    match db.transaction(|tx| f(tx)) {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(Abort::Conflict(e))) => Err(e.into()),
        Err(TransactionError::Abort(Abort::Invariant(e))) => {
            error!(invariant = %e, "transaction aborted on invariant breach");
            Err(e.into())
        }
        Err(TransactionError::Abort(Abort::Codec(msg))) => {
            Err(anyhow::anyhow!("storage codec failure: {msg}"))
        }
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

/// Decode an entity from a plain (non-transactional) read.
pub(crate) fn get<T>(db: &sled::Db, key: &str) -> anyhow::Result<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match db.get(key)? {
        Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
        None => Ok(None),
    }
}
