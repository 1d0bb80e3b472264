//! Printable form of a container for text workflows.
//!
//! Format: `invisilock1:` followed by unpadded base64url. The result has no
//! whitespace and survives copy-paste through chat, URLs and shells.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use invisilock_common::{Error, Result};

const FAMILY_PREFIX: &str = "invisilock";

/// Prefix of version 1 armor.
pub const ARMOR_PREFIX: &str = "invisilock1:";

/// Armor container bytes.
pub fn wrap(container: &[u8]) -> String {
    format!("{}{}", ARMOR_PREFIX, URL_SAFE_NO_PAD.encode(container))
}

/// Recover container bytes from armored text.
///
/// Surrounding whitespace is ignored.
///
/// # Errors
/// - `Format` if the text is not armor or the body is not valid base64url
/// - `UnsupportedVersion` for armor from a different format version
pub fn unwrap(armored: &str) -> Result<Vec<u8>> {
    let armored = armored.trim();

    if let Some(body) = armored.strip_prefix(ARMOR_PREFIX) {
        URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| Error::Format(format!("armor body is not valid base64url: {}", e)))
    } else if armored.starts_with(FAMILY_PREFIX) {
        Err(Error::UnsupportedVersion(
            "armored text uses an unknown version".to_string(),
        ))
    } else {
        Err(Error::Format(
            "text is not an armored InvisiLock container".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let bytes: Vec<u8> = (0..=255).collect();
        let armored = wrap(&bytes);

        assert!(armored.starts_with(ARMOR_PREFIX));
        assert!(!armored.contains('='));
        assert!(!armored.contains(char::is_whitespace));
        assert_eq!(unwrap(&armored).unwrap(), bytes);
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let armored = format!("  {}\n", wrap(b"IVLK"));
        assert_eq!(unwrap(&armored).unwrap(), b"IVLK");
    }

    #[test]
    fn test_future_version_rejected() {
        assert!(matches!(
            unwrap("invisilock2:AAAA"),
            Err(Error::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_foreign_text_rejected() {
        assert!(matches!(unwrap(""), Err(Error::Format(_))));
        assert!(matches!(unwrap("saltybox1:AAAA"), Err(Error::Format(_))));
        assert!(matches!(unwrap("invisilock1:***"), Err(Error::Format(_))));
    }
}
