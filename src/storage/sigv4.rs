// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! AWS Signature Version 4 for S3-compatible storage nodes.
//!
//! Signing key: HMAC chain over date, region, service and `aws4_request`,
//! seeded with `"AWS4" + secret`. The signature covers the canonical request
//! (method, URI, query, signed headers and payload hash).

use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "s3";

/// SHA-256 of an empty payload.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// The parts of a request covered by the signature.
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded path, e.g. `/bucket-name/report.csv`
    pub path: &'a str,
    /// Canonical query string; empty when there is none
    pub query: &'a str,
    /// Lowercase header names and their values
    pub headers: Vec<(&'a str, String)>,
    pub payload_sha256: &'a str,
}

impl CanonicalRequest<'_> {
    fn sorted_headers(&self) -> Vec<(&str, &str)> {
        let mut headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| (*name, value.trim()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(b.0));
        headers
    }

    pub fn signed_headers(&self) -> String {
        self.sorted_headers()
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn render(&self) -> String {
        let mut canonical_headers = String::new();
        for (name, value) in self.sorted_headers() {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(value);
            canonical_headers.push('\n');
        }
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.path,
            self.query,
            canonical_headers,
            self.signed_headers(),
            self.payload_sha256
        )
    }
}

/// Access key pair plus the region requests are scoped to.
#[derive(Clone)]
pub struct Signer {
    access_key: String,
    secret_key: String,
    region: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("access_key", &self.access_key)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
        }
    }

    /// `Authorization` header value for `request`, sent at `amz_date`
    /// (`YYYYMMDDTHHMMSSZ`).
    pub fn authorization(
        &self,
        request: &CanonicalRequest<'_>,
        amz_date: &str,
    ) -> Result<String, StorageError> {
        let date = amz_date
            .get(..8)
            .ok_or_else(|| StorageError::InvalidInput(format!("bad x-amz-date {:?}", amz_date)))?;
        let scope = format!("{}/{}/{}/aws4_request", date, self.region, SERVICE);

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(request.render().as_bytes())
        );

        let k_date = hmac_sign(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes())?;
        let k_region = hmac_sign(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sign(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac_sign(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac_sign(&k_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.access_key,
            scope,
            request.signed_headers(),
            signature
        ))
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Percent-encode everything but the unreserved set (`A-Z a-z 0-9 - _ . ~`).
/// `/` passes through when `keep_slash` is set, as S3 object keys require.
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn hmac_sign(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StorageError::Internal(format!("hmac key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
