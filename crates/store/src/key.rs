use crate::StoreError;

const MAX_KEY_LEN: usize = 128;

/// Validates a record key that file-backed stores use as a file name.
///
/// Rejects:
/// - Empty keys and keys longer than 128 bytes
/// - Path separators (`/`, `\`) and drive markers (`:`)
/// - Keys starting with `.` (hidden files, `.` and `..`)
/// - Control characters
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".into()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "key longer than {MAX_KEY_LEN} bytes"
        )));
    }

    if key.starts_with('.') {
        return Err(StoreError::InvalidKey(format!(
            "leading dot not allowed: {key}"
        )));
    }

    if let Some(c) = key
        .chars()
        .find(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
    {
        return Err(StoreError::InvalidKey(format!(
            "character {c:?} not allowed: {key}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keys() {
        assert!(validate_key("transfer-1").is_ok());
        assert!(validate_key("3f2a_b7c9").is_ok());
        assert!(validate_key("file.part").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_key("..").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("C:x").is_err());
    }

    #[test]
    fn rejects_hidden_and_control() {
        assert!(validate_key(".hidden").is_err());
        assert!(validate_key("bad\nkey").is_err());
    }

    #[test]
    fn rejects_too_long() {
        let key = "a".repeat(MAX_KEY_LEN + 1);
        assert!(validate_key(&key).is_err());
        assert!(validate_key(&"a".repeat(MAX_KEY_LEN)).is_ok());
    }
}
