//! UUIDv7 transaction identifiers.
//!
//! Transaction ids are minted as UUIDv7, which embed a millisecond
//! timestamp in the first 48 bits. Ids minted later sort later, so the
//! mapping table and logs read in ingest order.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::TransactionId;
use crate::traits::TransactionIdFactory;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

/// Check if a UUID is version 7.
#[inline]
pub fn is_v7(uuid: &Uuid) -> bool {
    uuid.get_version_num() == 7
}

/// Extract the timestamp from a UUIDv7.
///
/// Returns `None` if the UUID is not version 7.
pub fn extract_timestamp(uuid: &Uuid) -> Option<DateTime<Utc>> {
    let bytes = uuid.as_bytes();
    if (bytes[6] >> 4) != 7 {
        return None;
    }

    let millis = ((bytes[0] as u64) << 40)
        | ((bytes[1] as u64) << 32)
        | ((bytes[2] as u64) << 24)
        | ((bytes[3] as u64) << 16)
        | ((bytes[4] as u64) << 8)
        | (bytes[5] as u64);

    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Default factory: every transaction id is a fresh hyphenated UUIDv7.
///
/// # Example
///
/// ```
/// use fedcat_core::{TransactionIdFactory, UuidV7TransactionIdFactory};
///
/// let factory = UuidV7TransactionIdFactory;
/// let tx = factory.mint();
/// assert_eq!(factory.parse(tx.as_str()).unwrap(), tx);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV7TransactionIdFactory;

impl TransactionIdFactory for UuidV7TransactionIdFactory {
    fn mint(&self) -> TransactionId {
        TransactionId::new(new_v7().hyphenated().to_string())
    }

    fn parse(&self, raw: &str) -> Result<TransactionId> {
        let uuid = Uuid::parse_str(raw)
            .map_err(|e| Error::InvalidInput(format!("transaction id {raw:?}: {e}")))?;
        Ok(TransactionId::new(uuid.hyphenated().to_string()))
    }
}

/// Monotonic `<prefix>-<n>` ids. Deterministic, for fixtures and demos.
#[derive(Debug)]
pub struct SequentialTransactionIdFactory {
    prefix: String,
    next: AtomicU64,
}

impl SequentialTransactionIdFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl TransactionIdFactory for SequentialTransactionIdFactory {
    fn mint(&self) -> TransactionId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        TransactionId::new(format!("{}-{}", self.prefix, n))
    }

    fn parse(&self, raw: &str) -> Result<TransactionId> {
        let valid = raw
            .strip_prefix(&self.prefix)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|n| n.parse::<u64>().is_ok());
        if valid {
            Ok(TransactionId::new(raw))
        } else {
            Err(Error::InvalidInput(format!("transaction id {raw:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_v7_is_version_7() {
        assert!(is_v7(&new_v7()));
        assert!(!is_v7(&Uuid::new_v4()));
    }

    #[test]
    fn test_minted_ids_are_time_ordered() {
        let factory = UuidV7TransactionIdFactory;
        let a = factory.mint();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = factory.mint();
        assert!(b > a);
    }

    #[test]
    fn test_minted_ids_are_unique() {
        let factory = UuidV7TransactionIdFactory;
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| factory.mint()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_timestamp_extraction() {
        let before = Utc::now();
        let id = new_v7();
        let after = Utc::now();

        let extracted = extract_timestamp(&id).expect("should extract timestamp");
        assert!(extracted >= before - Duration::milliseconds(1));
        assert!(extracted <= after + Duration::milliseconds(1));
        assert!(extract_timestamp(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_parse_normalizes_case() {
        let factory = UuidV7TransactionIdFactory;
        let tx = factory.mint();
        let upper = tx.as_str().to_uppercase();
        assert_eq!(factory.parse(&upper).unwrap(), tx);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = UuidV7TransactionIdFactory.parse("not-a-uuid").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_sequential_factory() {
        let factory = SequentialTransactionIdFactory::new("tx");
        assert_eq!(factory.mint().as_str(), "tx-1");
        assert_eq!(factory.mint().as_str(), "tx-2");
        assert!(factory.parse("tx-9").is_ok());
        assert!(factory.parse("tx-").is_err());
        assert!(factory.parse("other-1").is_err());
    }
}
