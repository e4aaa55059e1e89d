use std::collections::BTreeMap;

/// Flattened string-keyed attribute map as stored on canonical records.
pub type Attributes = BTreeMap<String, String>;

/// Attribute value as received on the wire, before flattening.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Null => serde_json::Value::Null,
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Int(i) => serde_json::Value::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
            AttrValue::String(s) => serde_json::Value::String(s.clone()),
            AttrValue::Array(values) => {
                serde_json::Value::Array(values.iter().map(AttrValue::to_json).collect())
            }
            AttrValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Text form used in a flattened label map. Nested values become JSON text;
    /// `Null` has no label form.
    pub fn to_label(&self) -> Option<String> {
        match self {
            AttrValue::Null => None,
            AttrValue::Bool(b) => Some(b.to_string()),
            AttrValue::Int(i) => Some(i.to_string()),
            AttrValue::Float(f) => Some(f.to_string()),
            AttrValue::String(s) => Some(s.clone()),
            AttrValue::Array(_) | AttrValue::Map(_) => Some(self.to_json().to_string()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

/// Flattens key/value pairs into a label map. Later duplicates win and
/// null values are dropped.
pub fn flatten<I, K>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, AttrValue)>,
    K: Into<String>,
{
    let mut out = Attributes::new();
    for (key, value) in pairs {
        if let Some(text) = value.to_label() {
            out.insert(key.into(), text);
        }
    }
    out
}
