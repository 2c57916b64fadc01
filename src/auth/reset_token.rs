use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::users::repo_types::PendingReset;

const TOKEN_BYTES: usize = 32;

/// A freshly minted reset secret. Only `pending` is persisted; `plaintext` is
/// mailed once and dropped.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub plaintext: String,
    pub pending: PendingReset,
}

pub fn generate(now: OffsetDateTime, ttl: Duration) -> ResetToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let plaintext = hex::encode(bytes);
    let digest = digest(&plaintext);
    ResetToken {
        plaintext,
        pending: PendingReset {
            digest,
            expires_at: now + ttl,
        },
    }
}

/// sha256, hex encoded. Fast on purpose: the secret's entropy is the margin.
pub fn digest(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}
