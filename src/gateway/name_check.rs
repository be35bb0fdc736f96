use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static DISALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\. "$*<>:|?\x00]"#).expect("static regex"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("database name is empty")]
    Empty,
    #[error("database name is {len} bytes, limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("database name contains disallowed character {0:?}")]
    DisallowedChar(char),
}

pub fn check_database_name(name: &str, max_len: usize) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }

    if name.len() > max_len {
        return Err(NameError::TooLong {
            len: name.len(),
            max: max_len,
        });
    }

    if let Some(m) = DISALLOWED_CHARS.find(name) {
        let c = m.as_str().chars().next().unwrap_or('\0');
        return Err(NameError::DisallowedChar(c));
    }

    Ok(())
}

pub fn check_shard_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_valid_names() {
        assert!(check_database_name("sales", 63).is_ok());
        assert!(check_database_name("Sales_2024-eu", 63).is_ok());
        assert!(check_database_name(&"a".repeat(63), 63).is_ok());
    }

    #[test]
    pub fn test_invalid_names() {
        assert_eq!(check_database_name("", 63), Err(NameError::Empty));
        assert_eq!(
            check_database_name(&"a".repeat(64), 63),
            Err(NameError::TooLong { len: 64, max: 63 })
        );
        assert_eq!(
            check_database_name("sales.eu", 63),
            Err(NameError::DisallowedChar('.'))
        );
        assert_eq!(
            check_database_name("sa les", 63),
            Err(NameError::DisallowedChar(' '))
        );
        assert_eq!(
            check_database_name("a\\b", 63),
            Err(NameError::DisallowedChar('\\'))
        );
        assert_eq!(
            check_database_name("a\0b", 63),
            Err(NameError::DisallowedChar('\0'))
        );
        for bad in ["a/b", "a\"b", "a$b", "a*b", "a<b", "a>b", "a:b", "a|b", "a?b"] {
            assert!(check_database_name(bad, 63).is_err(), "{bad}");
        }
    }

    #[test]
    pub fn test_shard_name() {
        assert!(check_shard_name("shard0000"));
        assert!(!check_shard_name(""));
        assert!(!check_shard_name("shard 1"));
    }
}
