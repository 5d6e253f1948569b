//! Secret redaction for log output.

use std::fmt;

const REDACTED: &str = "<sensitive>";

/// Displays `value`'s `Debug` output with every non-empty secret replaced.
///
/// Wrap values at the log call site: `info!(config = %Redacted::new(&cfg, &secrets))`.
pub struct Redacted<'a, T: fmt::Debug + ?Sized> {
    value: &'a T,
    secrets: &'a [&'a str],
}

impl<'a, T: fmt::Debug + ?Sized> Redacted<'a, T> {
    pub fn new(value: &'a T, secrets: &'a [&'a str]) -> Self {
        Self { value, secrets }
    }
}

impl<T: fmt::Debug + ?Sized> fmt::Display for Redacted<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = format!("{:?}", self.value);
        for secret in self.secrets.iter().filter(|s| !s.is_empty()) {
            // Debug output escapes quotes, backslashes and control characters
            let quoted = format!("{secret:?}");
            let escaped = &quoted[1..quoted.len() - 1];
            text = text.replace(escaped, REDACTED).replace(*secret, REDACTED);
        }
        f.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct Access {
        public_key: String,
        private_key: String,
        region: String,
    }

    #[test]
    fn secrets_are_replaced_and_the_rest_kept() {
        let access = Access {
            public_key: "pub-123".into(),
            private_key: "priv-456".into(),
            region: "cn-bj2".into(),
        };
        let out = Redacted::new(&access, &["pub-123", "priv-456"]).to_string();
        assert!(!out.contains("pub-123"));
        assert!(!out.contains("priv-456"));
        assert!(out.contains("cn-bj2"));
        assert_eq!(out.matches(REDACTED).count(), 2);
    }

    #[test]
    fn secrets_with_escaped_characters_are_replaced() {
        let access = Access {
            public_key: "pub\"quoted".into(),
            private_key: "priv\\back\nline".into(),
            region: "cn-bj2".into(),
        };
        let out = Redacted::new(&access, &["pub\"quoted", "priv\\back\nline"]).to_string();
        assert!(!out.contains("quoted"), "{out}");
        assert!(!out.contains("back"), "{out}");
        assert!(!out.contains("line"), "{out}");
        assert_eq!(out.matches(REDACTED).count(), 2);
    }

    #[test]
    fn empty_secret_is_ignored() {
        let out = Redacted::new("plain", &[""]).to_string();
        assert_eq!(out, "\"plain\"");
    }
}
