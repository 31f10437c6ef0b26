//! Pre-extraction deduplication key.
//!
//! The fingerprint is computed from stable listing fields only. OCR output,
//! timestamps, and anything else that can differ between runs for the same
//! physical announcement must stay out of it.

use sha2::{Digest, Sha256};

use crate::models::Listing;

/// SHA-256 over the listing's stable identity fields, hex-encoded.
pub fn fingerprint(listing: &Listing) -> String {
    let material = format!(
        "{}|{}|{}|{}",
        listing.external_id.trim(),
        listing.title.trim(),
        listing.edition_no.as_deref().unwrap_or("").trim(),
        listing.category.trim(),
    );
    let digest = Sha256::digest(material.as_bytes());
    hex(&digest)
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
