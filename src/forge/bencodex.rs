//! Minimal Bencodex encoder.
//!
//! | Value   | Encoding                  |
//! |---------|---------------------------|
//! | null    | `n`                       |
//! | bool    | `t` / `f`                 |
//! | integer | `i<decimal>e`             |
//! | binary  | `<len>:<bytes>`           |
//! | text    | `u<len>:<utf8>`           |
//! | list    | `l<items>e`               |
//! | dict    | `d<key><value>...e`       |
//!
//! Dictionary keys are canonically ordered: all binary keys before all text
//! keys, each group by byte order. [`Key`]'s derived `Ord` matches that.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Key {
    Binary(Vec<u8>),
    Text(String),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i128),
    Binary(Vec<u8>),
    Text(String),
    List(Vec<Value>),
    Dict(BTreeMap<Key, Value>),
}

impl Value {
    /// Dictionary with text keys
    pub fn text_dict<I, K>(entries: I) -> Value
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<Key>,
    {
        Value::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => out.push(b'n'),
            Value::Bool(true) => out.push(b't'),
            Value::Bool(false) => out.push(b'f'),
            Value::Integer(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Binary(bytes) => encode_binary(bytes, out),
            Value::Text(s) => encode_text(s, out),
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    match key {
                        Key::Binary(bytes) => encode_binary(bytes, out),
                        Key::Text(s) => encode_text(s, out),
                    }
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }
}

fn encode_binary(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn encode_text(s: &str, out: &mut Vec<u8>) {
    out.push(b'u');
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(v: &Value) -> String {
        String::from_utf8_lossy(&v.encode()).into_owned()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(enc(&Value::Null), "n");
        assert_eq!(enc(&Value::Bool(true)), "t");
        assert_eq!(enc(&Value::Integer(-12)), "i-12e");
        assert_eq!(enc(&Value::Binary(b"ab".to_vec())), "2:ab");
        assert_eq!(enc(&Value::Text("héllo".into())), "u6:héllo");
    }

    #[test]
    fn test_dict_key_order() {
        let mut map = BTreeMap::new();
        map.insert(Key::Text("b".into()), Value::Integer(1));
        map.insert(Key::Text("a".into()), Value::Integer(2));
        map.insert(Key::Binary(b"z".to_vec()), Value::Null);
        assert_eq!(enc(&Value::Dict(map)), "d1:znu1:ai2eu1:bi1ee");
    }

    #[test]
    fn test_nested_list() {
        let v = Value::List(vec![Value::Text("x".into()), Value::List(vec![])]);
        assert_eq!(enc(&v), "lu1:xlee");
    }
}
