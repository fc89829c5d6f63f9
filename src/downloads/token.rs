//! Download link token derivation.
//!
//! A token is the last path segment of a download URL. In opaque mode it is a
//! digest of the source path salted with a server-wide secret, so the real
//! location never appears in rendered pages. In transparent mode it is just
//! the file's own name, offering indirection but no concealment.

use sha2::{Digest, Sha256};

/// Server-wide salt for opaque tokens, provided at startup from
/// configuration. Injected everywhere it is needed so tests can pin it.
#[derive(Clone)]
pub struct TokenSecret(String);

impl TokenSecret {
    pub fn new<T: AsRef<str>>(value: T) -> TokenSecret {
        TokenSecret(value.as_ref().to_owned())
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Splits a path or URL into the file's stem and its extension, looking only
/// at the last path segment. A trailing query string is not stripped; sources
/// are expected to be plain paths or direct file URLs.
pub fn split_source_name(source_path: &str) -> (&str, Option<&str>) {
    let base_name = source_path
        .rsplit('/')
        .next()
        .expect("rsplit yields at least one segment");
    match base_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() && !extension.is_empty() => {
            (stem, Some(extension))
        }
        _ => (base_name, None),
    }
}

/// The name presented to the client when the file is served, `stem.ext` or
/// the bare stem when the source has no extension.
pub fn attachment_name(source_path: &str) -> String {
    match split_source_name(source_path) {
        (stem, Some(extension)) => format!("{}.{}", stem, extension),
        (stem, None) => stem.to_owned(),
    }
}

/// Derives the URL token for a source path. Pure and deterministic: the
/// registration path and the render path both call this and must agree.
///
/// Opaque tokens are `hex(sha256(source_path + secret))`. Transparent tokens
/// are the file's own name; a source with no extension normalizes to the
/// bare stem, with no trailing dot.
pub fn derive_token(source_path: &str, opaque: bool, secret: &TokenSecret) -> String {
    if opaque {
        let mut hasher = Sha256::new();
        hasher.update(source_path.as_bytes());
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    } else {
        attachment_name(source_path)
    }
}
