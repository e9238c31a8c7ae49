//! AMF0 value model
//!
//! Objects keep their properties in wire order so that a decoded command or
//! metadata object re-encodes byte-for-byte the same way.

use std::fmt;

/// Insertion-ordered property list used for AMF0 objects and ECMA arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmfObject {
    properties: Vec<(String, AmfValue)>,
}

impl AmfObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AmfValue>) {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AmfValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AmfValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfObject {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut object = AmfObject::new();
        for (k, v) in iter {
            object.insert(k, v);
        }
        object
    }
}

/// A decoded AMF0 value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// 0x00
    Number(f64),
    /// 0x01
    Boolean(bool),
    /// 0x02 / 0x0C (long string)
    String(String),
    /// 0x03
    Object(AmfObject),
    /// 0x05
    Null,
    /// 0x06 (also produced for 0x0D Unsupported)
    Undefined,
    /// 0x08 associative array
    EcmaArray(AmfObject),
    /// 0x0A dense array
    StrictArray(Vec<AmfValue>),
    /// 0x0B milliseconds since the Unix epoch
    Date(f64),
    /// 0x0F
    Xml(String),
    /// 0x10
    TypedObject {
        class_name: String,
        properties: AmfObject,
    },
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Object-like values: plain objects, ECMA arrays and typed objects
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key)?.as_bool()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl fmt::Display for AmfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfValue::Number(n) => write!(f, "{}", n),
            AmfValue::Boolean(b) => write!(f, "{}", b),
            AmfValue::String(s) | AmfValue::Xml(s) => write!(f, "{:?}", s),
            AmfValue::Null => f.write_str("null"),
            AmfValue::Undefined => f.write_str("undefined"),
            AmfValue::Date(ms) => write!(f, "Date({})", ms),
            AmfValue::StrictArray(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            AmfValue::Object(props)
            | AmfValue::EcmaArray(props)
            | AmfValue::TypedObject {
                properties: props, ..
            } => {
                f.write_str("{")?;
                for (i, (k, v)) in props.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<AmfObject> for AmfValue {
    fn from(v: AmfObject) -> Self {
        AmfValue::Object(v)
    }
}

impl<V: Into<AmfValue>> From<Option<V>> for AmfValue {
    fn from(v: Option<V>) -> Self {
        v.map(Into::into).unwrap_or(AmfValue::Null)
    }
}
