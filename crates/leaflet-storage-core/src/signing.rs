//! Value signing with HMAC-SHA256
//!
//! Signed values have the shape `value:signature` where the signature is the
//! unpadded URL-safe base64 of an HMAC over the value. Each use gets its own
//! salt so a signature minted for one purpose never validates for another.

use crate::{MapId, Result, StorageError};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = ':';

/// Salt of the signature embedded in anonymous edit URLs
pub const ANONYMOUS_EDIT_SALT: &str = "anonymous_edit";

/// Name of the cookie proving anonymous ownership of a map
pub fn anonymous_cookie_name(map_id: MapId) -> String {
    format!("anonymous_owner|{}", map_id)
}

/// HMAC signer keyed by the server secret
pub struct Signer {
    secret: Vec<u8>,
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, salt: &str) -> Result<HmacSha256> {
        // One key per salt
        let mut hasher = Sha256::new();
        hasher.update(b"leaflet_storage.signer");
        hasher.update(salt.as_bytes());
        hasher.update(&self.secret);
        let key = hasher.finalize();
        HmacSha256::new_from_slice(&key).map_err(|e| StorageError::Invalid(e.to_string()))
    }

    pub fn signature(&self, value: &str, salt: &str) -> Result<String> {
        let mut mac = self.mac(salt)?;
        mac.update(value.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    pub fn sign(&self, value: &str, salt: &str) -> Result<String> {
        Ok(format!("{}{}{}", value, SEPARATOR, self.signature(value, salt)?))
    }

    pub fn unsign(&self, signed: &str, salt: &str) -> Result<String> {
        let (value, signature) = signed
            .rsplit_once(SEPARATOR)
            .ok_or(StorageError::BadSignature)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StorageError::BadSignature)?;
        let mut mac = self.mac(salt)?;
        mac.update(value.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| StorageError::BadSignature)?;
        Ok(value.to_string())
    }

    /// Value of the anonymous ownership cookie for `map_id`
    pub fn anonymous_cookie_value(&self, map_id: MapId) -> Result<String> {
        self.sign(&map_id.to_string(), &anonymous_cookie_name(map_id))
    }

    pub fn is_anonymous_owner(&self, map_id: MapId, cookie: Option<&str>) -> bool {
        let Some(cookie) = cookie else {
            return false;
        };
        match self.unsign(cookie, &anonymous_cookie_name(map_id)) {
            Ok(value) => value == map_id.to_string(),
            Err(_) => false,
        }
    }

    /// Path segment of the anonymous edit URL for `map_id`
    pub fn anonymous_edit_signature(&self, map_id: MapId) -> Result<String> {
        self.sign(&map_id.to_string(), ANONYMOUS_EDIT_SALT)
    }

    /// Recover the map id from an anonymous edit URL signature
    pub fn unsign_anonymous_edit(&self, signature: &str) -> Result<MapId> {
        self.unsign(signature, ANONYMOUS_EDIT_SALT)?
            .parse()
            .map_err(|_| StorageError::BadSignature)
    }
}
