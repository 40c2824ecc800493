//! Kernel command-line decoding.
//!
//! The boot parameter line is a whitespace separated list of
//! `key[=value[,value...]]` tokens. There is no escaping.

use std::collections::BTreeMap;
use std::path::Path;

use serde::ser::{Serialize, SerializeSeq, Serializer};
use userboot_shared::constants::cmdline;
use userboot_shared::errors::{BootError, BootResult};

/// Value of a single boot parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Key present without `=`.
    Flag,
    /// `key=value`
    Single(String),
    /// `key=a,b,c`
    List(Vec<String>),
}

impl ParamValue {
    fn parse(raw: &str) -> Self {
        let mut parts: Vec<String> = raw.split(',').map(str::to_string).collect();
        if parts.len() == 1 {
            Self::Single(parts.remove(0))
        } else {
            Self::List(parts)
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Flag => serializer.serialize_bool(true),
            Self::Single(value) => serializer.serialize_str(value),
            Self::List(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for value in values {
                    seq.serialize_element(value)?;
                }
                seq.end()
            }
        }
    }
}

/// Decoded boot parameters.
///
/// Immutable after decoding, except for the root device which the
/// interactive recovery path may correct.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct BootConfig {
    params: BTreeMap<String, ParamValue>,
}

impl BootConfig {
    /// Decode a raw boot parameter line.
    ///
    /// Later tokens overwrite earlier ones with the same key. A token with
    /// an empty key (`=x`) is stored under the empty string.
    pub fn decode(line: &str) -> Self {
        let params = line
            .split_whitespace()
            .map(|token| match token.split_once('=') {
                Some((key, value)) => (key.to_string(), ParamValue::parse(value)),
                None => (token.to_string(), ParamValue::Flag),
            })
            .collect();

        Self { params }
    }

    /// Read and decode the boot parameter line at `path`.
    pub async fn load(path: &Path) -> BootResult<Self> {
        let line = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BootError::lookup(path, e))?;
        Ok(Self::decode(&line))
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// String value of `key`; list values are re-joined with commas.
    pub fn value(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            ParamValue::Flag => None,
            ParamValue::Single(value) => Some(value.clone()),
            ParamValue::List(values) => Some(values.join(",")),
        }
    }

    pub fn root(&self) -> Option<String> {
        self.value(cmdline::ROOT)
    }

    pub fn root_fs_type(&self) -> Option<String> {
        self.value(cmdline::ROOT_FS_TYPE)
    }

    pub fn single_user(&self) -> bool {
        self.is_set(cmdline::SINGLE)
    }

    /// Replace the root device with a value entered on the console.
    pub fn set_root(&mut self, device: impl Into<String>) {
        self.params
            .insert(cmdline::ROOT.to_string(), ParamValue::Single(device.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single(value: &str) -> ParamValue {
        ParamValue::Single(value.to_string())
    }

    #[test]
    fn test_decode_key_values() {
        let config = BootConfig::decode("initrd=\\img root=PARTUUID=abc");

        assert_eq!(config.get("initrd"), Some(&single("\\img")));
        assert_eq!(config.get("root"), Some(&single("PARTUUID=abc")));
    }

    #[test]
    fn test_decode_flag() {
        let config = BootConfig::decode("single root=PARTUUID=abc");

        assert_eq!(config.get("single"), Some(&ParamValue::Flag));
        assert!(config.single_user());
        assert_eq!(config.root().as_deref(), Some("PARTUUID=abc"));
    }

    #[test]
    fn test_decode_list() {
        let config = BootConfig::decode("root=a,b,c");

        assert_eq!(
            config.get("root"),
            Some(&ParamValue::List(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ]))
        );
        assert_eq!(config.root().as_deref(), Some("a,b,c"));
    }

    #[test]
    fn test_decode_trailing_newline_and_repeated_spaces() {
        let config = BootConfig::decode("  quiet   rootfstype=ext4\n");

        assert!(config.is_set("quiet"));
        assert!(!config.is_set(""));
        assert_eq!(config.root_fs_type().as_deref(), Some("ext4"));
        assert!(!config.single_user());
    }

    #[test]
    fn test_decode_empty_key_and_empty_value() {
        let config = BootConfig::decode("=x root=");

        assert_eq!(config.get(""), Some(&single("x")));
        assert_eq!(config.root().as_deref(), Some(""));
    }

    #[test]
    fn test_later_token_wins() {
        let config = BootConfig::decode("root=/dev/sda1 root=/dev/sdb1");
        assert_eq!(config.root().as_deref(), Some("/dev/sdb1"));
    }

    #[test]
    fn test_flag_has_no_string_value() {
        let config = BootConfig::decode("root");
        assert_eq!(config.root(), None);
        assert!(config.is_set("root"));
    }

    #[test]
    fn test_set_root_overrides() {
        let mut config = BootConfig::decode("root=/dev/missing quiet");
        config.set_root("/dev/vda");

        assert_eq!(config.root().as_deref(), Some("/dev/vda"));
        assert!(config.is_set("quiet"));
    }

    #[test]
    fn test_serialize_as_json() {
        let config = BootConfig::decode("single root=a,b vga=791");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"root":["a","b"],"single":true,"vga":"791"}"#);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmdline");
        std::fs::write(&path, "console=ttyS0 root=/dev/vda\n").unwrap();

        let config = BootConfig::load(&path).await.unwrap();
        assert_eq!(config.root().as_deref(), Some("/dev/vda"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = BootConfig::load(Path::new("/nonexistent/cmdline"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::Lookup { .. }));
    }

    proptest! {
        #[test]
        fn prop_bare_tokens_are_flags(key in "[a-z_.]{1,12}") {
            let config = BootConfig::decode(&key);
            prop_assert_eq!(config.get(&key), Some(&ParamValue::Flag));
        }

        #[test]
        fn prop_comma_values_split_in_order(
            parts in proptest::collection::vec("[a-zA-Z0-9/=:]{0,8}", 1..6)
        ) {
            let config = BootConfig::decode(&format!("k={}", parts.join(",")));
            let expected = if parts.len() == 1 {
                ParamValue::Single(parts[0].clone())
            } else {
                ParamValue::List(parts.clone())
            };
            prop_assert_eq!(config.get("k"), Some(&expected));
        }
    }
}
