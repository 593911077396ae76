//! Time-limited signed read URLs for published VOD files.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks signatures for `(file path, expiry)` pairs.
pub trait UrlSigner: Send + Sync {
    /// Signature authorizing reads of `file_path` until `expires` (Unix seconds).
    fn sign(&self, file_path: &str, expires: i64) -> String;

    /// Whether `signature` was issued by [`UrlSigner::sign`] for these inputs.
    fn verify(&self, file_path: &str, expires: i64, signature: &str) -> bool;
}

/// HMAC-SHA256 over `"{file_path}\n{expires}"`, hex encoded.
#[derive(Clone)]
pub struct HmacUrlSigner {
    keyed: HmacSha256,
}

impl HmacUrlSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> cf_core::Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| cf_core::Error::Validation(format!("invalid signing secret: {e}")))?;
        Ok(Self { keyed })
    }

    fn mac(&self, file_path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(file_path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

impl std::fmt::Debug for HmacUrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacUrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner for HmacUrlSigner {
    fn sign(&self, file_path: &str, expires: i64) -> String {
        hex::encode(self.mac(file_path, expires).finalize().into_bytes())
    }

    fn verify(&self, file_path: &str, expires: i64, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        // Constant-time comparison.
        self.mac(file_path, expires).verify_slice(&expected).is_ok()
    }
}
