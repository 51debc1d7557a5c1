//! Durable payment-intent storage.
//!
//! Records live in the `intents` tree keyed by id. The `leases` tree maps a
//! deposit address to the id of its single Pending intent, and the
//! `unfulfilled` tree indexes Confirmed intents whose reward is still owed.
//! Both indexes are only ever written in the same transaction as the record
//! they point at.

use crate::error::{Error, Result};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use tronpay_core::{IntentStatus, PaymentIntent};
use uuid::Uuid;

pub trait PaymentStore: Send + Sync {
    /// Inserts a new Pending intent and takes the lease on its address.
    /// Fails with [`Error::AddressLeased`] if the address is already held.
    fn create(&self, intent: &PaymentIntent) -> Result<PaymentIntent>;

    /// Overwrites the whole record if its stored revision still equals
    /// `intent.revision`; returns the record as written.
    fn update(&self, intent: &PaymentIntent) -> Result<PaymentIntent>;

    fn get(&self, id: &Uuid) -> Result<Option<PaymentIntent>>;

    fn get_active_by_address(&self, address: &str) -> Result<Option<PaymentIntent>>;

    fn list_pending(&self) -> Result<Vec<PaymentIntent>>;

    /// Confirmed, not yet fulfilled, and not flagged for follow-up.
    fn list_unfulfilled(&self) -> Result<Vec<PaymentIntent>>;

    /// Every record, newest first.
    fn list_all(&self) -> Result<Vec<PaymentIntent>>;

    fn list_by_user(&self, user_id: &str) -> Result<Vec<PaymentIntent>>;
}

#[derive(Debug)]
enum Abort {
    Leased(Uuid),
    Missing,
    Duplicate,
    Stale { found: u64 },
    Invalid(String),
    Corrupt(String),
}

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<Abort>>;

fn abort<T>(reason: Abort) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(reason))
}

#[derive(Clone)]
pub struct SledPaymentStore {
    db: Db,
    intents: Tree,
    leases: Tree,
    unfulfilled: Tree,
}

impl SledPaymentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A throwaway store, removed when dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self> {
        let intents = db.open_tree("intents")?;
        let leases = db.open_tree("leases")?;
        let unfulfilled = db.open_tree("unfulfilled")?;
        Ok(Self {
            db,
            intents,
            leases,
            unfulfilled,
        })
    }

    fn decode(bytes: &[u8]) -> Result<PaymentIntent> {
        serde_json::from_slice(bytes).map_err(|e| Error::CorruptRecord(e.to_string()))
    }

    fn scan<F>(&self, mut keep: F) -> Result<Vec<PaymentIntent>>
    where
        F: FnMut(&PaymentIntent) -> bool,
    {
        let mut out = Vec::new();
        for item in self.intents.iter() {
            let (_k, v) = item?;
            let rec = Self::decode(&v)?;
            if keep(&rec) {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn finish(&self, res: std::result::Result<(), TransactionError<Abort>>, intent: &PaymentIntent) -> Result<()> {
        match res {
            Ok(()) => {
                self.db.flush()?;
                Ok(())
            }
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
            Err(TransactionError::Abort(reason)) => Err(match reason {
                Abort::Leased(holder) => Error::AddressLeased {
                    address: intent.address.clone(),
                    holder,
                },
                Abort::Missing => Error::IntentNotFound(intent.id),
                Abort::Duplicate => {
                    Error::InvalidRequest(format!("intent {} already exists", intent.id))
                }
                Abort::Stale { found } => Error::StaleRevision {
                    id: intent.id,
                    expected: intent.revision,
                    found,
                },
                Abort::Invalid(msg) => Error::InvalidRequest(msg),
                Abort::Corrupt(msg) => Error::CorruptRecord(msg),
            }),
        }
    }
}

fn holder_id(bytes: &[u8]) -> Abort {
    match Uuid::from_slice(bytes) {
        Ok(id) => Abort::Leased(id),
        Err(e) => Abort::Corrupt(format!("bad lease entry: {e}")),
    }
}

impl PaymentStore for SledPaymentStore {
    fn create(&self, intent: &PaymentIntent) -> Result<PaymentIntent> {
        if !intent.is_pending() {
            return Err(Error::InvalidRequest(format!(
                "cannot create intent {} in status {}",
                intent.id, intent.status
            )));
        }

        let mut record = intent.clone();
        record.revision = 1;
        let bytes = serde_json::to_vec(&record)?;
        let id_key = record.id.as_bytes().to_vec();
        let addr_key = record.address.as_bytes().to_vec();

        let res = (&self.intents, &self.leases).transaction(|(intents, leases)| {
            if let Some(holder) = leases.get(addr_key.as_slice())? {
                return abort(holder_id(&holder));
            }
            if intents.get(id_key.as_slice())?.is_some() {
                return abort(Abort::Duplicate);
            }
            intents.insert(id_key.as_slice(), bytes.as_slice())?;
            leases.insert(addr_key.as_slice(), id_key.as_slice())?;
            Ok(())
        });
        self.finish(res, intent)?;

        tracing::debug!(intent_id = %record.id, address = %record.address, "Intent stored");
        Ok(record)
    }

    fn update(&self, intent: &PaymentIntent) -> Result<PaymentIntent> {
        let expected = intent.revision;
        let mut next = intent.clone();
        next.revision = expected + 1;
        let bytes = serde_json::to_vec(&next)?;
        let id_key = next.id.as_bytes().to_vec();
        let addr_key = next.address.as_bytes().to_vec();

        let owed =
            next.status == IntentStatus::Confirmed && !next.fulfilled && !next.needs_attention;

        let trees = (&self.intents, &self.leases, &self.unfulfilled);
        let res = trees.transaction(|(intents, leases, unfulfilled)| {
            let current = match intents.get(id_key.as_slice())? {
                Some(v) => v,
                None => return abort(Abort::Missing),
            };
            let current: PaymentIntent = match serde_json::from_slice(&current) {
                Ok(c) => c,
                Err(e) => return abort(Abort::Corrupt(e.to_string())),
            };

            if current.revision != expected {
                return abort(Abort::Stale {
                    found: current.revision,
                });
            }
            if current.address != next.address {
                return abort(Abort::Invalid("intent address cannot change".into()));
            }
            if current.status.is_terminal() && current.status != next.status {
                return abort(Abort::Invalid(format!(
                    "intent is {} and cannot become {}",
                    current.status, next.status
                )));
            }
            if current.fulfilled && !next.fulfilled {
                return abort(Abort::Invalid("fulfilled flag cannot be reset".into()));
            }

            let lease = leases.get(addr_key.as_slice())?;
            if next.is_pending() {
                match lease {
                    Some(holder) if holder.as_ref() != id_key.as_slice() => {
                        return abort(holder_id(&holder));
                    }
                    Some(_) => {}
                    None => {
                        leases.insert(addr_key.as_slice(), id_key.as_slice())?;
                    }
                }
            } else if lease.as_deref() == Some(id_key.as_slice()) {
                leases.remove(addr_key.as_slice())?;
            }

            if owed {
                unfulfilled.insert(id_key.as_slice(), id_key.as_slice())?;
            } else {
                unfulfilled.remove(id_key.as_slice())?;
            }
            intents.insert(id_key.as_slice(), bytes.as_slice())?;
            Ok(())
        });
        self.finish(res, intent)?;

        tracing::debug!(
            intent_id = %next.id,
            status = %next.status,
            revision = next.revision,
            "Intent updated"
        );
        Ok(next)
    }

    fn get(&self, id: &Uuid) -> Result<Option<PaymentIntent>> {
        match self.intents.get(id.as_bytes())? {
            Some(v) => Ok(Some(Self::decode(&v)?)),
            None => Ok(None),
        }
    }

    fn get_active_by_address(&self, address: &str) -> Result<Option<PaymentIntent>> {
        let Some(holder) = self.leases.get(address.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&holder)
            .map_err(|e| Error::CorruptRecord(format!("bad lease entry for {address}: {e}")))?;
        Ok(self.get(&id)?.filter(PaymentIntent::is_pending))
    }

    fn list_pending(&self) -> Result<Vec<PaymentIntent>> {
        let mut out = self.scan(PaymentIntent::is_pending)?;
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    fn list_unfulfilled(&self) -> Result<Vec<PaymentIntent>> {
        let mut out = Vec::new();
        for item in self.unfulfilled.iter() {
            let (id, _) = item?;
            let id = Uuid::from_slice(&id)
                .map_err(|e| Error::CorruptRecord(format!("bad unfulfilled entry: {e}")))?;
            if let Some(rec) = self.get(&id)? {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn list_all(&self) -> Result<Vec<PaymentIntent>> {
        let mut out = self.scan(|_| true)?;
        out.sort_by_key(|r| r.created_at);
        out.reverse();
        Ok(out)
    }

    fn list_by_user(&self, user_id: &str) -> Result<Vec<PaymentIntent>> {
        let mut out = self.scan(|r| r.user_id == user_id)?;
        out.sort_by_key(|r| r.created_at);
        out.reverse();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ADDR: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn pending(user: &str) -> PaymentIntent {
        PaymentIntent::new(user, ADDR, 10_000_000, 10.0, 0, Utc::now(), chrono::Duration::hours(24))
    }

    #[test]
    fn create_takes_the_lease() {
        let store = SledPaymentStore::temporary().unwrap();
        let a = store.create(&pending("1")).unwrap();
        assert_eq!(a.revision, 1);

        let active = store.get_active_by_address(ADDR).unwrap().unwrap();
        assert_eq!(active.id, a.id);

        let err = store.create(&pending("2")).unwrap_err();
        assert!(matches!(err, Error::AddressLeased { holder, .. } if holder == a.id));
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn terminal_update_releases_the_lease() {
        let store = SledPaymentStore::temporary().unwrap();
        let mut a = store.create(&pending("1")).unwrap();
        a.status = IntentStatus::Expired;
        let a = store.update(&a).unwrap();
        assert_eq!(a.revision, 2);

        assert!(store.get_active_by_address(ADDR).unwrap().is_none());
        assert!(store.list_pending().unwrap().is_empty());
        store.create(&pending("2")).unwrap();
    }

    #[test]
    fn stale_revision_is_rejected() {
        let store = SledPaymentStore::temporary().unwrap();
        let a = store.create(&pending("1")).unwrap();

        let mut first = a.clone();
        first.status = IntentStatus::Confirmed;
        store.update(&first).unwrap();

        let mut second = a;
        second.expected_amount = 1;
        let err = store.update(&second).unwrap_err();
        assert!(matches!(err, Error::StaleRevision { expected: 1, found: 2, .. }));
    }

    #[test]
    fn terminal_status_is_final() {
        let store = SledPaymentStore::temporary().unwrap();
        let mut a = store.create(&pending("1")).unwrap();
        a.status = IntentStatus::Expired;
        let mut a = store.update(&a).unwrap();
        a.status = IntentStatus::Confirmed;
        assert!(matches!(store.update(&a), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn fulfilled_is_never_reset() {
        let store = SledPaymentStore::temporary().unwrap();
        let mut a = store.create(&pending("1")).unwrap();
        a.status = IntentStatus::Confirmed;
        a.fulfilled = true;
        let mut a = store.update(&a).unwrap();
        a.fulfilled = false;
        assert!(matches!(store.update(&a), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn unfulfilled_index_follows_the_record() {
        let store = SledPaymentStore::temporary().unwrap();
        let mut a = store.create(&pending("1")).unwrap();
        assert!(store.list_unfulfilled().unwrap().is_empty());

        a.status = IntentStatus::Confirmed;
        let mut a = store.update(&a).unwrap();
        let owed = store.list_unfulfilled().unwrap();
        assert_eq!(owed.len(), 1);
        assert_eq!(owed[0].id, a.id);

        a.fulfilled = true;
        store.update(&a).unwrap();
        assert!(store.list_unfulfilled().unwrap().is_empty());

        let mut b = pending("2");
        b.created_at = a.created_at + chrono::Duration::seconds(1);
        let mut b = store.create(&b).unwrap();
        b.status = IntentStatus::Confirmed;
        b.needs_attention = true;
        store.update(&b).unwrap();
        assert!(store.list_unfulfilled().unwrap().is_empty());
    }

    #[test]
    fn update_of_unknown_intent_fails() {
        let store = SledPaymentStore::temporary().unwrap();
        let a = pending("1");
        assert!(matches!(store.update(&a), Err(Error::IntentNotFound(id)) if id == a.id));
    }

    #[test]
    fn lists_by_user_newest_first() {
        let store = SledPaymentStore::temporary().unwrap();
        let mut first = store.create(&pending("7")).unwrap();
        first.status = IntentStatus::Expired;
        store.update(&first).unwrap();

        let mut later = pending("7");
        later.created_at = first.created_at + chrono::Duration::seconds(5);
        let later = store.create(&later).unwrap();

        let mine = store.list_by_user("7").unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, later.id);
        assert!(store.list_by_user("8").unwrap().is_empty());
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = SledPaymentStore::open(dir.path()).unwrap();
            store.create(&pending("1")).unwrap().id
        };
        let store = SledPaymentStore::open(dir.path()).unwrap();
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(store.get_active_by_address(ADDR).unwrap().unwrap().id, id);
    }
}
