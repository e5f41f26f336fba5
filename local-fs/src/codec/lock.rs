use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{get_string, put_string};
use crate::error::CodecError;

/// A lock held on a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Token required to modify or unlock the file.
    pub token: String,

    /// Expiration as epoch milliseconds. [`LockRecord::NEVER_EXPIRES`] for
    /// locks without a timeout.
    pub expires_at: i64,
}

impl LockRecord {
    /// Expiration value of a lock that never expires.
    pub const NEVER_EXPIRES: i64 = i64::MAX;

    /// Create a lock that expires `timeout` after `now`. A zero timeout
    /// never expires.
    pub fn new(token: impl Into<String>, timeout: Duration, now: DateTime<Utc>) -> Self {
        let expires_at = if timeout.is_zero() {
            Self::NEVER_EXPIRES
        } else {
            let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
            now.timestamp_millis().saturating_add(millis)
        };
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the lock has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at != Self::NEVER_EXPIRES && self.expires_at <= now.timestamp_millis()
    }

    /// Expiration time, or `None` for locks that never expire.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        if self.expires_at == Self::NEVER_EXPIRES {
            return None;
        }
        DateTime::from_timestamp_millis(self.expires_at)
    }
}

/// Encodes and decodes lock records.
///
/// Layout: token string, then expiration as a big-endian `i64`. Records
/// written before expirations existed carry only the token and decode as
/// never expiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockCodec;

impl LockCodec {
    /// Encode a lock record.
    pub fn encode(record: &LockRecord) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(2 + record.token.len() + 8);
        put_string(&mut buf, "lock token", &record.token)?;
        buf.put_i64(record.expires_at);
        Ok(buf.freeze())
    }

    /// Decode a lock record.
    pub fn decode(mut input: &[u8]) -> Result<LockRecord, CodecError> {
        let token = get_string(&mut input, "lock token")?;
        let expires_at = match input.remaining() {
            0 => LockRecord::NEVER_EXPIRES,
            remaining if remaining < 8 => {
                return Err(CodecError::UnexpectedEof {
                    field: "lock expiration",
                    needed: 8,
                    remaining,
                });
            }
            _ => input.get_i64(),
        };
        Ok(LockRecord { token, expires_at })
    }
}
