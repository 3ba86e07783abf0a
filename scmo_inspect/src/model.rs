//! JSON input files and their mapping onto engine values.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use scmo_core::{
    CimDateTime, CimType, CimValue, ClassCache, ClassDefinition, MemoryClassProvider, PropertyDecl,
    QualifierDecl, Scalar, ScmoClass, ScmoInstance,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassFile {
    pub namespace: String,
    pub class_name: String,
    #[serde(default)]
    pub super_class: Option<String>,
    #[serde(default)]
    pub properties: Vec<PropertyFile>,
    #[serde(default)]
    pub qualifiers: Vec<QualifierFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFile {
    pub name: String,
    #[serde(rename = "type")]
    pub cim_type: String,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub reference_class: Option<String>,
    #[serde(default)]
    pub propagated: bool,
    #[serde(default)]
    pub qualifiers: Vec<QualifierFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifierFile {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub flavor: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFile {
    pub namespace: String,
    pub class_name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub key_bindings: Map<String, Value>,
}

fn parse_type(name: &str, text: &str) -> Result<CimType> {
    CimType::from_name(text).ok_or_else(|| anyhow!("{}: unknown CIM type '{}'", name, text))
}

fn qualifier(q: &QualifierFile) -> Result<QualifierDecl> {
    let value = infer_value(&q.name, &q.value)?;
    let decl = QualifierDecl::new(q.name.clone(), value);
    Ok(match q.flavor {
        Some(flavor) => decl.with_flavor(flavor),
        None => decl,
    })
}

impl ClassFile {
    /// Embedded-instance defaults are not expressible in class files.
    pub fn to_definition(&self) -> Result<ClassDefinition> {
        let mut def = ClassDefinition::new(&self.namespace, &self.class_name);
        if let Some(super_class) = &self.super_class {
            def = def.with_super_class(super_class);
        }
        for q in &self.qualifiers {
            def = def.with_qualifier(qualifier(q)?);
        }
        for p in &self.properties {
            let cim_type = parse_type(&p.name, &p.cim_type)?;
            let mut decl = if p.array {
                PropertyDecl::array(&p.name, cim_type)
            } else {
                PropertyDecl::new(&p.name, cim_type)
            };
            if p.key {
                decl = decl.key();
            }
            if let Some(default) = &p.default {
                if cim_type.is_external() && !default.is_null() {
                    bail!("{}: {} defaults are not supported", p.name, cim_type);
                }
                let value = json_value(&p.name, cim_type, p.array, default, None)?;
                decl = decl.with_default(value);
            }
            if let Some(origin) = &p.origin {
                decl = decl.with_origin(origin);
            }
            if let Some(reference_class) = &p.reference_class {
                decl = decl.with_reference_class(reference_class);
            }
            if p.propagated {
                decl = decl.propagated();
            }
            for q in &p.qualifiers {
                decl = decl.with_qualifier(qualifier(q)?);
            }
            def = def.with_property(decl);
        }
        Ok(def)
    }
}

/// Maps a JSON value to a value of the declared type. Embedded instances
/// are written as nested instance objects and built through `loader`.
pub fn json_value(
    name: &str,
    cim_type: CimType,
    is_array: bool,
    json: &Value,
    loader: Option<&Loader>,
) -> Result<CimValue> {
    if json.is_null() {
        return Ok(CimValue::Null { cim_type, is_array });
    }
    if !is_array {
        return Ok(CimValue::Scalar(json_scalar(name, cim_type, json, loader)?));
    }
    let items = json
        .as_array()
        .ok_or_else(|| anyhow!("{}: expected a JSON array", name))?;
    let elements = items
        .iter()
        .map(|item| json_scalar(name, cim_type, item, loader))
        .collect::<Result<Vec<_>>>()?;
    Ok(CimValue::array(cim_type, elements))
}

pub fn json_scalar(name: &str, cim_type: CimType, json: &Value, loader: Option<&Loader>) -> Result<Scalar> {
    let wrong = || anyhow!("{}: {} is not a valid {}", name, json, cim_type);
    let unsigned = || json.as_u64().ok_or_else(wrong);
    let signed = || json.as_i64().ok_or_else(wrong);
    let scalar = match cim_type {
        CimType::Boolean => Scalar::Boolean(json.as_bool().ok_or_else(wrong)?),
        CimType::Uint8 => Scalar::Uint8(u8::try_from(unsigned()?).map_err(|_| wrong())?),
        CimType::Uint16 => Scalar::Uint16(u16::try_from(unsigned()?).map_err(|_| wrong())?),
        CimType::Uint32 => Scalar::Uint32(u32::try_from(unsigned()?).map_err(|_| wrong())?),
        CimType::Uint64 => Scalar::Uint64(unsigned()?),
        CimType::Sint8 => Scalar::Sint8(i8::try_from(signed()?).map_err(|_| wrong())?),
        CimType::Sint16 => Scalar::Sint16(i16::try_from(signed()?).map_err(|_| wrong())?),
        CimType::Sint32 => Scalar::Sint32(i32::try_from(signed()?).map_err(|_| wrong())?),
        CimType::Sint64 => Scalar::Sint64(signed()?),
        CimType::Real32 => Scalar::Real32(json.as_f64().ok_or_else(wrong)? as f32),
        CimType::Real64 => Scalar::Real64(json.as_f64().ok_or_else(wrong)?),
        CimType::Char16 => {
            let s = json.as_str().ok_or_else(wrong)?;
            let mut units = s.encode_utf16();
            match (units.next(), units.next()) {
                (Some(u), None) => Scalar::Char16(u),
                _ => return Err(wrong()),
            }
        }
        CimType::String => Scalar::String(json.as_str().ok_or_else(wrong)?.to_string()),
        CimType::DateTime => {
            let s = json.as_str().ok_or_else(wrong)?;
            Scalar::DateTime(CimDateTime::parse(s).with_context(|| format!("{}: bad datetime", name))?)
        }
        CimType::Reference | CimType::Object | CimType::Instance => {
            let loader = loader.ok_or_else(|| anyhow!("{}: embedded instances need a loader", name))?;
            let file: InstanceFile = serde_json::from_value(json.clone())
                .with_context(|| format!("{}: expected a nested instance", name))?;
            let instance = loader.instance(&file)?;
            match cim_type {
                CimType::Reference => Scalar::Reference(instance),
                CimType::Object => Scalar::Object(instance),
                _ => Scalar::Instance(instance),
            }
        }
    };
    Ok(scalar)
}

/// Type guessed from the JSON shape, for names the class does not declare.
fn infer_type(json: &Value) -> CimType {
    match json {
        Value::Bool(_) => CimType::Boolean,
        Value::Number(n) if n.is_u64() => CimType::Uint64,
        Value::Number(n) if n.is_i64() => CimType::Sint64,
        Value::Number(_) => CimType::Real64,
        Value::Object(_) => CimType::Instance,
        Value::Array(items) => items.first().map(infer_type).unwrap_or(CimType::String),
        _ => CimType::String,
    }
}

fn infer_value(name: &str, json: &Value) -> Result<CimValue> {
    json_value(name, infer_type(json), json.is_array(), json, None)
}

/// Builds classes and instances from their JSON files.
pub struct Loader {
    cache: ClassCache<MemoryClassProvider>,
}

impl Loader {
    pub fn new(classes: &[ClassFile], config: scmo_core::EngineConfig) -> Result<Self> {
        let provider = classes
            .iter()
            .map(ClassFile::to_definition)
            .collect::<Result<MemoryClassProvider>>()?;
        Ok(Self {
            cache: ClassCache::new(provider, config),
        })
    }

    pub fn class(&self, namespace: &str, class_name: &str) -> Result<ScmoClass> {
        self.cache
            .get(namespace, class_name)?
            .ok_or_else(|| anyhow!("class {}:{} is not defined", namespace, class_name))
    }

    pub fn classes(&self, files: &[ClassFile]) -> Result<Vec<ScmoClass>> {
        files
            .iter()
            .map(|f| self.class(&f.namespace, &f.class_name))
            .collect()
    }

    pub fn instance(&self, file: &InstanceFile) -> Result<ScmoInstance> {
        let class = match self.cache.get(&file.namespace, &file.class_name)? {
            Some(class) => class,
            None => ScmoClass::empty(&file.namespace, &file.class_name)?,
        };

        let mut properties = Vec::with_capacity(file.properties.len());
        for (name, json) in &file.properties {
            let value = match class.property(name) {
                Ok(p) => json_value(name, p.cim_type, p.is_array, json, Some(self))?,
                Err(_) => json_value(name, infer_type(json), json.is_array(), json, Some(self))?,
            };
            properties.push((name.as_str(), value));
        }

        let mut keys = Vec::with_capacity(file.key_bindings.len());
        for (name, json) in &file.key_bindings {
            let cim_type = match class.find_key_binding(name) {
                Ok(i) => class.key_binding_at(i)?.cim_type,
                Err(_) => infer_type(json),
            };
            keys.push((name.as_str(), json_scalar(name, cim_type, json, Some(self))?));
        }

        let mut instance = ScmoInstance::bind(&class, properties, keys, self.cache.config())
            .with_context(|| format!("binding instance of {}", file.class_name))?;
        if let Some(host) = &file.host {
            instance.set_host_name(host)?;
        }
        Ok(instance)
    }
}
