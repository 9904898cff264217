//! Transaction views handed to `read` and `update` closures.
//!
//! A read transaction borrows an immutable snapshot of committed state and
//! can never observe a concurrent writer. A write transaction works on a
//! private copy of the buckets it touches and records every mutation as a
//! log [`Op`]; nothing becomes visible until the store commits the whole
//! batch atomically.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bucket::Bucket;
use crate::error::{Error, Result};
use crate::log::Op;
use crate::store::CommittedState;
use crate::value::Value;

// ============================================================================
// Read transactions
// ============================================================================

/// A consistent, immutable view of the store at a single commit point.
pub struct ReadTransaction {
    snapshot: Arc<CommittedState>,
}

impl ReadTransaction {
    pub(crate) fn new(snapshot: Arc<CommittedState>) -> Self {
        Self { snapshot }
    }

    /// Opens a read handle on a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BucketDoesNotExist`] if no bucket with this name was
    /// committed at the snapshot point.
    pub fn bucket(&self, name: &str) -> Result<ReadBucket<'_>> {
        let bucket = self
            .snapshot
            .buckets
            .get(name)
            .ok_or_else(|| Error::BucketDoesNotExist { name: name.to_string() })?;
        Ok(ReadBucket { bucket })
    }

    /// Names of every bucket visible in this snapshot, in lexicographic
    /// order.
    pub fn bucket_names(&self) -> Vec<String> {
        self.snapshot.buckets.keys().cloned().collect()
    }
}

/// Read-only handle on one bucket within a [`ReadTransaction`].
pub struct ReadBucket<'t> {
    bucket: &'t Bucket,
}

impl ReadBucket<'_> {
    /// Looks up a key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDoesNotExist`] if the key is absent.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.bucket
            .get(key)
            .cloned()
            .ok_or_else(|| Error::KeyDoesNotExist { key: key.to_string() })
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.bucket.contains(key)
    }

    /// Number of keys in the bucket.
    pub fn len(&self) -> usize {
        self.bucket.len()
    }

    /// Whether the bucket holds no keys.
    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty()
    }

    /// Visits every entry in key order.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Value)) {
        for (key, value) in self.bucket.iter() {
            f(key, value);
        }
    }
}

// ============================================================================
// Write transactions
// ============================================================================

/// A mutable view used by `update` closures.
///
/// Mutations land in a private copy of the committed buckets and are recorded
/// as ops in call order. If the closure returns an error the whole copy is
/// discarded; if it succeeds the store applies the copy and appends the ops
/// as one log entry. A transaction that records no ops commits nothing and
/// consumes no identifier.
pub struct WriteTransaction {
    buckets: BTreeMap<String, Bucket>,
    ops: Vec<Op>,
}

impl WriteTransaction {
    pub(crate) fn new(snapshot: &CommittedState) -> Self {
        Self { buckets: snapshot.buckets.clone(), ops: Vec::new() }
    }

    /// Creates an empty bucket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BucketExists`] if the name is already taken, either
    /// by committed state or earlier in this same transaction.
    pub fn create(&mut self, name: &str) -> Result<WriteBucket<'_>> {
        if self.buckets.contains_key(name) {
            return Err(Error::BucketExists { name: name.to_string() });
        }
        self.buckets.insert(name.to_string(), Bucket::new());
        self.ops.push(Op::CreateBucket { bucket: name.to_string() });
        Ok(WriteBucket { txn: self, name: name.to_string() })
    }

    /// Opens an existing bucket for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BucketDoesNotExist`] if the bucket is absent from
    /// this transaction's view.
    pub fn bucket(&mut self, name: &str) -> Result<WriteBucket<'_>> {
        if !self.buckets.contains_key(name) {
            return Err(Error::BucketDoesNotExist { name: name.to_string() });
        }
        Ok(WriteBucket { txn: self, name: name.to_string() })
    }

    /// Names of every bucket in this transaction's view.
    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, Bucket>, Vec<Op>) {
        (self.buckets, self.ops)
    }
}

/// Read/write handle on one bucket within a [`WriteTransaction`].
pub struct WriteBucket<'t> {
    txn: &'t mut WriteTransaction,
    name: String,
}

impl WriteBucket<'_> {
    fn bucket(&self) -> &Bucket {
        // Handles are only constructed for names present in the map.
        &self.txn.buckets[&self.name]
    }

    /// Looks up a key in the transaction's current view, including writes
    /// made earlier in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyDoesNotExist`] if the key is absent.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.bucket()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::KeyDoesNotExist { key: key.to_string() })
    }

    /// Whether the key is present in the current view.
    pub fn contains(&self, key: &str) -> bool {
        self.bucket().contains(key)
    }

    /// Number of keys in the current view.
    pub fn len(&self) -> usize {
        self.bucket().len()
    }

    /// Whether the bucket holds no keys in the current view.
    pub fn is_empty(&self) -> bool {
        self.bucket().is_empty()
    }

    /// Inserts or overwrites a key.
    ///
    /// The value is validated for encodability up front so a commit can
    /// never fail on serialization after the closure returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if the value cannot be encoded.
    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut scratch = Vec::new();
        value.encode(&mut scratch)?;

        let bucket = self
            .txn
            .buckets
            .get_mut(&self.name)
            .ok_or_else(|| Error::BucketDoesNotExist { name: self.name.clone() })?;
        bucket.insert(key.to_string(), value.clone());
        self.txn.ops.push(Op::Put {
            bucket: self.name.clone(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Removes a key entirely.
    ///
    /// Deleting an absent key succeeds and still records the operation, so a
    /// replayed log converges on the same state regardless of whether the
    /// key existed at record time.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        let bucket = self
            .txn
            .buckets
            .get_mut(&self.name)
            .ok_or_else(|| Error::BucketDoesNotExist { name: self.name.clone() })?;
        bucket.remove(key);
        self.txn.ops.push(Op::Delete { bucket: self.name.clone(), key: key.to_string() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CommittedState;

    fn empty_state() -> CommittedState {
        CommittedState::default()
    }

    #[test]
    fn test_create_then_reuse_name_fails() {
        let state = empty_state();
        let mut txn = WriteTransaction::new(&state);
        txn.create("bkt").unwrap();
        assert!(matches!(txn.create("bkt"), Err(Error::BucketExists { .. })));
    }

    #[test]
    fn test_writes_visible_within_transaction() {
        let state = empty_state();
        let mut txn = WriteTransaction::new(&state);
        let mut bkt = txn.create("bkt").unwrap();
        bkt.put("k", "hello").unwrap();
        assert_eq!(bkt.get("k").unwrap(), Value::Text("hello".to_string()));
    }

    #[test]
    fn test_delete_absent_key_records_op() {
        let state = empty_state();
        let mut txn = WriteTransaction::new(&state);
        let mut bkt = txn.create("bkt").unwrap();
        bkt.delete("never-there").unwrap();

        let (_, ops) = txn.into_parts();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[1], Op::Delete { key, .. } if key == "never-there"));
    }

    #[test]
    fn test_ops_record_in_call_order() {
        let state = empty_state();
        let mut txn = WriteTransaction::new(&state);
        let mut bkt = txn.create("bkt").unwrap();
        bkt.put("1", "one").unwrap();
        bkt.put("2", "two").unwrap();
        bkt.delete("1").unwrap();

        let (_, ops) = txn.into_parts();
        assert!(matches!(&ops[0], Op::CreateBucket { .. }));
        assert!(matches!(&ops[1], Op::Put { key, .. } if key == "1"));
        assert!(matches!(&ops[2], Op::Put { key, .. } if key == "2"));
        assert!(matches!(&ops[3], Op::Delete { key, .. } if key == "1"));
    }

    #[test]
    fn test_missing_bucket_is_error() {
        let state = empty_state();
        let mut txn = WriteTransaction::new(&state);
        assert!(matches!(txn.bucket("nope"), Err(Error::BucketDoesNotExist { .. })));
    }
}
