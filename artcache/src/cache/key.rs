//! Cache key sanitization.
//!
//! Caller keys are arbitrary strings (URLs with query strings, composite
//! identifiers). They are mapped to filesystem-safe tokens that double as
//! on-disk file names.
//!
//! # Encoding
//!
//! ASCII letters, digits and `-` are kept as-is. Every other byte, including
//! `_` itself and `.`, is written as `_XX` (two uppercase hex digits). The
//! mapping is injective, and tokens never contain `.`, so a token cannot
//! collide with the `.meta` sidecar or `.tmp` staging names of another.
//!
//! Tokens longer than [`MAX_TOKEN_LEN`] are truncated and suffixed with
//! `~` plus the SHA-256 digest of the original key.
//!
//! ```text
//! https://img.example.com/p/7.jpg?w=500
//!   -> https_3A_2F_2Fimg_2Eexample_2Ecom_2Fp_2F7_2Ejpg_3Fw_3D500
//! ```

use sha2::{Digest, Sha256};

/// Maximum length of a sanitized token before hashing kicks in.
pub const MAX_TOKEN_LEN: usize = 160;

/// Length of the readable prefix kept for hashed tokens.
const HASHED_PREFIX_LEN: usize = 64;

/// Token used for the empty key.
const EMPTY_TOKEN: &str = "_";

/// Map a caller key to a filesystem-safe token.
///
/// # Example
///
/// ```
/// use artcache::cache::sanitize_key;
///
/// assert_eq!(sanitize_key("movie_42"), "movie_5F42");
/// assert_eq!(sanitize_key("a/b?c=d"), "a_2Fb_3Fc_3Dd");
/// ```
pub fn sanitize_key(key: &str) -> String {
    if key.is_empty() {
        return EMPTY_TOKEN.to_string();
    }

    let mut token = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            token.push(byte as char);
        } else {
            token.push('_');
            token.push_str(&format!("{:02X}", byte));
        }
    }

    if token.len() <= MAX_TOKEN_LEN {
        return token;
    }

    let digest = Sha256::digest(key.as_bytes());
    // The escaped token is pure ASCII, so any byte index is a char boundary.
    let mut prefix = token[..HASHED_PREFIX_LEN].to_string();
    // Avoid cutting an escape sequence in half.
    if let Some(pos) = prefix[prefix.len().saturating_sub(2)..].find('_') {
        prefix.truncate(prefix.len() - 2 + pos);
    }
    format!("{}~{:x}", prefix, digest)
}

/// Check whether a file name is a data token produced by [`sanitize_key`].
///
/// Sidecars, staging files and anything else a user dropped into the
/// directory are rejected.
pub fn is_data_token(file_name: &str) -> bool {
    !file_name.is_empty()
        && file_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'~')
}
