use std::fmt::{self, Display, Write};

use crate::types::KeyBindingType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKeyBinding {
    pub name: String,
    pub value: String,
    pub kind: KeyBindingType,
}

impl PathKeyBinding {
    pub fn new(name: impl Into<String>, value: impl Into<String>, kind: KeyBindingType) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind,
        }
    }

    fn write_value(&self, out: &mut impl Write, value: &str) -> fmt::Result {
        match self.kind {
            KeyBindingType::String | KeyBindingType::Reference => {
                out.write_char('"')?;
                for c in value.chars() {
                    if c == '"' || c == '\\' {
                        out.write_char('\\')?;
                    }
                    out.write_char(c)?;
                }
                out.write_char('"')
            }
            KeyBindingType::Boolean | KeyBindingType::Numeric => out.write_str(value),
        }
    }

    fn canonical_value(&self) -> String {
        match self.kind {
            KeyBindingType::Boolean => self.value.to_ascii_lowercase(),
            KeyBindingType::Numeric => normalize_number(&self.value),
            _ => self.value.clone(),
        }
    }
}

fn normalize_number(text: &str) -> String {
    let t = text.trim().trim_start_matches('+');
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        if let Ok(v) = u64::from_str_radix(hex, 16) {
            return v.to_string();
        }
    }
    if let Ok(v) = t.parse::<u64>() {
        return v.to_string();
    }
    if let Ok(v) = t.parse::<i64>() {
        return v.to_string();
    }
    if let Ok(v) = t.parse::<f64>() {
        return format!("{:?}", v);
    }
    text.to_string()
}

/// The identity of an instance: host, namespace, class and key bindings
/// sorted by case-insensitive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub host: Option<String>,
    pub namespace: String,
    pub class_name: String,
    pub key_bindings: Vec<PathKeyBinding>,
}

impl ObjectPath {
    pub fn new(
        host: Option<String>,
        namespace: impl Into<String>,
        class_name: impl Into<String>,
        mut key_bindings: Vec<PathKeyBinding>,
    ) -> Self {
        key_bindings.sort_by_cached_key(|k| k.name.to_lowercase());
        Self {
            host,
            namespace: namespace.into(),
            class_name: class_name.into(),
            key_bindings,
        }
    }

    fn write_model_path(&self, out: &mut impl Write, canonical: bool) -> fmt::Result {
        if canonical {
            out.write_str(&self.class_name.to_lowercase())?;
        } else {
            out.write_str(&self.class_name)?;
        }
        for (i, k) in self.key_bindings.iter().enumerate() {
            out.write_char(if i == 0 { '.' } else { ',' })?;
            if canonical {
                out.write_str(&k.name.to_lowercase())?;
                out.write_char('=')?;
                k.write_value(out, &k.canonical_value())?;
            } else {
                out.write_str(&k.name)?;
                out.write_char('=')?;
                k.write_value(out, &k.value)?;
            }
        }
        Ok(())
    }

    /// `Class.key1="v",key2=5`, without host or namespace.
    pub fn to_canonical_path(&self) -> String {
        let mut out = String::new();
        let _ = self.write_model_path(&mut out, false);
        out
    }

    /// The full path with names lower-cased and boolean and numeric key
    /// values normalized, suitable for identity comparison.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        if let Some(host) = &self.host {
            out.push_str("//");
            out.push_str(&host.to_lowercase());
            out.push('/');
        }
        if !self.namespace.is_empty() {
            out.push_str(&self.namespace.to_lowercase());
            out.push(':');
        }
        let _ = self.write_model_path(&mut out, true);
        out
    }
}

impl Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "//{}/", host)?;
        }
        if !self.namespace.is_empty() {
            write!(f, "{}:", self.namespace)?;
        }
        self.write_model_path(f, false)
    }
}
