use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisplayVec<T>(pub Vec<T>);

impl<T: Display> Display for DisplayVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "[")?;

        for item in &self.0 {
            writeln!(f, "  {item};")?;
        }

        write!(f, "]")
    }
}

pub(crate) trait BTreeMapInsertExt<K: Ord, V> {
    /// Insert the key-value pair, or return it untouched if the key is already present.
    fn insert_or_error(&mut self, key: K, value: V) -> Result<(), (K, V)>;
}

impl<K: Ord, V> BTreeMapInsertExt<K, V> for BTreeMap<K, V> {
    fn insert_or_error(&mut self, key: K, value: V) -> Result<(), (K, V)> {
        if self.contains_key(&key) {
            Err((key, value))
        } else {
            self.insert(key, value);
            Ok(())
        }
    }
}

/// Check whether a user-supplied name (output, tag, or filter argument) is usable:
/// ASCII letters, digits, and underscores only, not starting with a digit, not empty.
pub(crate) fn is_safe_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => return false,
        Some(first) => {
            if !first.is_ascii_alphabetic() && first != '_' {
                return false;
            }
        }
    }

    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::is_safe_name;

    #[test]
    fn safe_names() {
        assert!(is_safe_name("animal_name"));
        assert!(is_safe_name("_leading_underscore"));
        assert!(is_safe_name("name2"));

        assert!(!is_safe_name(""));
        assert!(!is_safe_name("2fast"));
        assert!(!is_safe_name("has-dash"));
        assert!(!is_safe_name("has space"));
        assert!(!is_safe_name("ünïcode"));
    }
}
