use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cell::{read_cell, write_cell};
use crate::config::EngineConfig;
use crate::definition::{ClassDefinition, PropertyDecl};
use crate::error::{Result, ScmoError};
use crate::memory::layout::*;
use crate::memory::Chunk;
use crate::ordered_set::{names_equal, HashedSet, KEY_BINDING_SET, PROPERTY_SET};
use crate::qualifier::{read_qualifiers, write_qualifiers, QualifierDecl};
use crate::types::CimType;
use crate::value::CimValue;

/// A class laid out in one chunk. Immutable once built and shared by every
/// instance bound to it; cloning the handle takes another reference.
#[derive(Clone)]
pub struct ScmoClass {
    inner: Arc<ClassInner>,
}

struct ClassInner {
    chunk: Chunk,
}

/// A property declaration read back from a class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProperty {
    pub name: String,
    pub cim_type: CimType,
    pub is_array: bool,
    pub is_key: bool,
    pub propagated: bool,
    pub class_origin: Option<String>,
    pub reference_class: Option<String>,
    pub default: CimValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassKeyBinding {
    pub name: String,
    pub cim_type: CimType,
}

impl fmt::Debug for ScmoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScmoClass")
            .field("namespace", &self.namespace())
            .field("class_name", &self.class_name())
            .field("properties", &self.property_count())
            .field("keys", &self.key_binding_count())
            .finish()
    }
}

impl ScmoClass {
    // === Construction ===

    pub fn build(definition: &ClassDefinition) -> Result<ScmoClass> {
        Self::build_with_config(definition, &EngineConfig::default())
    }

    pub fn build_with_config(definition: &ClassDefinition, config: &EngineConfig) -> Result<ScmoClass> {
        let config = config.normalized();
        let mut chunk = Chunk::new(
            CLASS_MAGIC,
            CLASS_MAIN_SIZE,
            config.initial_chunk_size,
            config.ext_ref_growth,
        );

        chunk.set_str(CLS_NAMESPACE, &definition.namespace)?;
        chunk.set_str(CLS_CLASS_NAME, &definition.class_name)?;
        if let Some(super_class) = &definition.super_class_name {
            chunk.set_str(CLS_SUPER_CLASS, super_class)?;
        }

        let properties = &definition.properties;
        let props = HashedSet::at(CLS_PROPERTY_SET, PROPERTY_SET);
        props.reserve(&mut chunk, properties.len())?;

        let mask_words = properties.len().div_ceil(64);
        let mask = chunk.alloc(mask_words * 8)?;
        chunk.write_ptr(CLS_KEY_MASK, mask);

        let mut keys = Vec::new();
        for decl in properties {
            let index = props.insert(&mut chunk, &decl.name)?;
            let node = props.node(&chunk, index);
            let is_key = write_property(&mut chunk, node, decl, &definition.class_name)?;
            if is_key {
                let word = mask.start as usize + (index / 64) * 8;
                let bits = chunk.read_u64(word) | 1u64 << (index % 64);
                chunk.write_u64(word, bits);
                keys.push(index);
            }
        }

        let key_list = chunk.alloc(keys.len() * 4)?;
        chunk.write_ptr(CLS_KEY_INDEX_LIST, key_list);
        let key_set = HashedSet::at(CLS_KEY_SET, KEY_BINDING_SET);
        key_set.reserve(&mut chunk, keys.len())?;
        for (k, &index) in keys.iter().enumerate() {
            chunk.write_u32(key_list.start as usize + k * 4, index as u32);
            let decl = &properties[index];
            let key_index = key_set.insert(&mut chunk, &decl.name)?;
            let node = key_set.node(&chunk, key_index);
            chunk.write_u32(node + KEY_TYPE, decl.cim_type as u32);
        }

        write_qualifiers(
            &mut chunk,
            CLS_QUALIFIER_COUNT,
            CLS_QUALIFIER_ARRAY,
            &definition.qualifiers,
        )?;

        debug!(
            namespace = %definition.namespace,
            class = %definition.class_name,
            properties = properties.len(),
            keys = keys.len(),
            bytes = chunk.start_of_free(),
            "built class"
        );
        Ok(ScmoClass {
            inner: Arc::new(ClassInner { chunk }),
        })
    }

    /// A class without properties, standing in for a class that could not
    /// be resolved.
    pub fn empty(namespace: &str, class_name: &str) -> Result<ScmoClass> {
        let mut chunk = Chunk::new(CLASS_MAGIC, CLASS_MAIN_SIZE, CLASS_MAIN_SIZE + 64, 1);
        chunk.set_str(CLS_NAMESPACE, namespace)?;
        chunk.set_str(CLS_CLASS_NAME, class_name)?;
        chunk.write_u32(CLS_FLAGS, CLS_FLAG_EMPTY);
        Ok(ScmoClass {
            inner: Arc::new(ClassInner { chunk }),
        })
    }

    /// Rebuilds a class from [`ScmoClass::as_bytes`] output.
    pub fn from_bytes(bytes: &[u8], config: &EngineConfig) -> Result<ScmoClass> {
        let mut chunk = Chunk::from_bytes(bytes, CLASS_MAGIC, CLASS_MAIN_SIZE, 0, config.ext_ref_growth)?;
        if chunk.ext_ref_count() > 0 {
            chunk.forget_ext_refs();
            return Err(ScmoError::invalid_chunk(
                "class carries embedded instance defaults, which cannot be restored from bytes",
            ));
        }
        for (header, layout) in [
            (CLS_PROPERTY_SET, PROPERTY_SET),
            (CLS_KEY_SET, KEY_BINDING_SET),
        ] {
            let set = HashedSet::at(header, layout);
            let n = set.len(&chunk);
            if n > 0 {
                let array = chunk.read_ptr(header + set_node_array(layout.hash_size));
                chunk.check_ptr(array, n * layout.node_size)?;
            }
        }
        check_key_tables(&chunk)?;
        Ok(ScmoClass {
            inner: Arc::new(ClassInner { chunk }),
        })
    }

    /// The used region of the chunk.
    pub fn as_bytes(&self) -> &[u8] {
        self.chunk().used_bytes()
    }

    pub(crate) fn chunk(&self) -> &Chunk {
        &self.inner.chunk
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn is_same(&self, other: &ScmoClass) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // === Header ===

    pub fn class_name(&self) -> &str {
        self.chunk().str_field(CLS_CLASS_NAME).unwrap_or("")
    }

    pub fn namespace(&self) -> &str {
        self.chunk().str_field(CLS_NAMESPACE).unwrap_or("")
    }

    pub fn super_class_name(&self) -> Option<&str> {
        self.chunk().str_field(CLS_SUPER_CLASS)
    }

    pub fn is_empty(&self) -> bool {
        self.chunk().read_u32(CLS_FLAGS) & CLS_FLAG_EMPTY != 0
    }

    pub fn qualifiers(&self) -> Result<Vec<QualifierDecl>> {
        read_qualifiers(self.chunk(), CLS_QUALIFIER_COUNT, CLS_QUALIFIER_ARRAY)
    }

    // === Properties ===

    pub(crate) fn property_set(&self) -> HashedSet {
        HashedSet::at(CLS_PROPERTY_SET, PROPERTY_SET)
    }

    pub fn property_count(&self) -> usize {
        self.property_set().len(self.chunk())
    }

    pub fn find_property(&self, name: &str) -> Result<usize> {
        self.property_set()
            .find(self.chunk(), name)
            .ok_or_else(|| ScmoError::not_found(name))
    }

    fn property_node(&self, index: usize) -> Result<usize> {
        let count = self.property_count();
        if index >= count {
            return Err(ScmoError::IndexOutOfBound { index, count });
        }
        Ok(self.property_set().node(self.chunk(), index))
    }

    pub(crate) fn default_cell(&self, index: usize) -> Result<usize> {
        Ok(self.property_node(index)? + PROP_DEFAULT)
    }

    pub fn property_name_at(&self, index: usize) -> Result<&str> {
        self.property_node(index)?;
        Ok(self.property_set().name_at(self.chunk(), index))
    }

    /// Declared type and array flag.
    pub fn property_type_at(&self, index: usize) -> Result<(CimType, bool)> {
        let cell = self.default_cell(index)?;
        let header = crate::cell::read_header(self.chunk(), cell)?;
        Ok((header.cim_type, header.is_array))
    }

    pub fn is_property_key(&self, index: usize) -> bool {
        if index >= self.property_count() {
            return false;
        }
        let mask = self.chunk().read_ptr(CLS_KEY_MASK);
        let word = self.chunk().read_u64(mask.start as usize + (index / 64) * 8);
        word & (1u64 << (index % 64)) != 0
    }

    pub fn property_origin(&self, index: usize) -> Result<Option<&str>> {
        let node = self.property_node(index)?;
        Ok(self.chunk().str_field(node + PROP_ORIGIN))
    }

    pub fn reference_class_name(&self, index: usize) -> Result<Option<&str>> {
        let node = self.property_node(index)?;
        Ok(self.chunk().str_field(node + PROP_REF_CLASS))
    }

    pub fn default_value(&self, index: usize) -> Result<CimValue> {
        read_cell(self.chunk(), self.default_cell(index)?)
    }

    pub fn property_qualifiers(&self, index: usize) -> Result<Vec<QualifierDecl>> {
        let node = self.property_node(index)?;
        read_qualifiers(
            self.chunk(),
            node + PROP_QUALIFIER_COUNT,
            node + PROP_QUALIFIER_ARRAY,
        )
    }

    pub fn property_at(&self, index: usize) -> Result<ClassProperty> {
        let node = self.property_node(index)?;
        let (cim_type, is_array) = self.property_type_at(index)?;
        let flags = self.chunk().read_u32(node + PROP_FLAGS);
        Ok(ClassProperty {
            name: self.property_set().name_at(self.chunk(), index).to_string(),
            cim_type,
            is_array,
            is_key: flags & PROP_FLAG_KEY != 0,
            propagated: flags & PROP_FLAG_PROPAGATED != 0,
            class_origin: self.property_origin(index)?.map(str::to_string),
            reference_class: self.reference_class_name(index)?.map(str::to_string),
            default: self.default_value(index)?,
        })
    }

    pub fn property(&self, name: &str) -> Result<ClassProperty> {
        self.property_at(self.find_property(name)?)
    }

    /// Checks a value of `cim_type` can be stored in property `index`.
    /// An instance is accepted for an object property.
    pub fn is_node_same_type(&self, index: usize, cim_type: CimType, is_array: bool) -> Result<()> {
        let (declared, declared_array) = self.property_type_at(index)?;
        let name = || self.property_set().name_at(self.chunk(), index).to_string();
        if declared != cim_type && !(declared == CimType::Object && cim_type == CimType::Instance) {
            return Err(ScmoError::TypeMismatch {
                name: name(),
                declared: declared.to_string(),
                supplied: cim_type.to_string(),
            });
        }
        match (declared_array, is_array) {
            (false, true) => Err(ScmoError::NotAnArray { name: name() }),
            (true, false) => Err(ScmoError::IsAnArray { name: name() }),
            _ => Ok(()),
        }
    }

    pub fn is_same_origin(&self, index: usize, origin: &str) -> Result<()> {
        match self.property_origin(index)? {
            Some(own) if !names_equal(own, origin) => Err(ScmoError::NotSameOrigin {
                name: self.property_set().name_at(self.chunk(), index).to_string(),
                origin: origin.to_string(),
            }),
            _ => Ok(()),
        }
    }

    // === Key bindings ===

    pub(crate) fn key_set(&self) -> HashedSet {
        HashedSet::at(CLS_KEY_SET, KEY_BINDING_SET)
    }

    pub fn key_binding_count(&self) -> usize {
        self.key_set().len(self.chunk())
    }

    pub fn find_key_binding(&self, name: &str) -> Result<usize> {
        self.key_set()
            .find(self.chunk(), name)
            .ok_or_else(|| ScmoError::not_found(name))
    }

    pub fn key_binding_at(&self, index: usize) -> Result<ClassKeyBinding> {
        let count = self.key_binding_count();
        if index >= count {
            return Err(ScmoError::IndexOutOfBound { index, count });
        }
        let node = self.key_set().node(self.chunk(), index);
        let tag = self.chunk().read_u32(node + KEY_TYPE);
        let cim_type = CimType::from_u32(tag)
            .ok_or_else(|| ScmoError::invalid_chunk(format!("unknown key type tag {}", tag)))?;
        Ok(ClassKeyBinding {
            name: self.key_set().name_at(self.chunk(), index).to_string(),
            cim_type,
        })
    }

    /// Key names in class declaration order.
    pub fn key_names(&self) -> Vec<&str> {
        let set = self.key_set();
        (0..set.len(self.chunk()))
            .map(|i| set.name_at(self.chunk(), i))
            .collect()
    }

    /// Property index of each key binding.
    pub fn key_index_list(&self) -> Vec<u32> {
        let list = self.chunk().read_ptr(CLS_KEY_INDEX_LIST);
        (0..self.key_binding_count())
            .map(|k| self.chunk().read_u32(list.start as usize + k * 4))
            .collect()
    }
}

/// Bounds of the key mask and key index list of a class read from bytes.
fn check_key_tables(chunk: &Chunk) -> Result<()> {
    let props = HashedSet::at(CLS_PROPERTY_SET, PROPERTY_SET).len(chunk);
    let keys = HashedSet::at(CLS_KEY_SET, KEY_BINDING_SET).len(chunk);
    let mask_words = props.div_ceil(64);
    if mask_words > 0 {
        chunk.check_ptr(chunk.read_ptr(CLS_KEY_MASK), mask_words * 8)?;
    }
    if keys > 0 {
        let list = chunk.read_ptr(CLS_KEY_INDEX_LIST);
        chunk.check_ptr(list, keys * 4)?;
        for k in 0..keys {
            let index = chunk.read_u32(list.start as usize + k * 4) as usize;
            if index >= props {
                return Err(ScmoError::invalid_chunk(format!(
                    "key {} names property {} of {}",
                    k, index, props
                )));
            }
        }
    }
    Ok(())
}

/// Lays out one property node. Returns whether the property is a key.
fn write_property(chunk: &mut Chunk, node: usize, decl: &PropertyDecl, class_name: &str) -> Result<bool> {
    let default = checked_default(decl)?;
    let is_key = decl.is_key();
    if is_key && (decl.is_array || decl.cim_type.key_binding_type().is_none()) {
        return Err(ScmoError::invalid_parameter(
            &decl.name,
            format!("a {} property cannot be a key", type_label(decl.cim_type, decl.is_array)),
        ));
    }

    let mut flags = 0;
    if decl.propagated {
        flags |= PROP_FLAG_PROPAGATED;
    }
    if is_key {
        flags |= PROP_FLAG_KEY;
    }
    chunk.write_u32(node + PROP_FLAGS, flags);
    chunk.set_str(
        node + PROP_ORIGIN,
        decl.class_origin.as_deref().unwrap_or(class_name),
    )?;
    if let Some(reference_class) = &decl.reference_class {
        chunk.set_str(node + PROP_REF_CLASS, reference_class)?;
    }
    write_cell(chunk, node + PROP_DEFAULT, &default, false)?;
    write_qualifiers(
        chunk,
        node + PROP_QUALIFIER_COUNT,
        node + PROP_QUALIFIER_ARRAY,
        &decl.qualifiers,
    )?;
    Ok(is_key)
}

fn checked_default(decl: &PropertyDecl) -> Result<CimValue> {
    let value = decl.default_value();
    value.validate(&decl.name)?;
    let supplied = value.cim_type();
    if supplied != decl.cim_type
        && !(decl.cim_type == CimType::Object && supplied == CimType::Instance)
    {
        return Err(ScmoError::TypeMismatch {
            name: decl.name.clone(),
            declared: decl.cim_type.to_string(),
            supplied: supplied.to_string(),
        });
    }
    match (decl.is_array, value.is_array()) {
        (false, true) => Err(ScmoError::NotAnArray {
            name: decl.name.clone(),
        }),
        (true, false) => Err(ScmoError::IsAnArray {
            name: decl.name.clone(),
        }),
        _ => Ok(value.retagged(decl.cim_type)),
    }
}

fn type_label(cim_type: CimType, is_array: bool) -> String {
    if is_array {
        format!("{}[]", cim_type)
    } else {
        cim_type.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::QualifierDecl;

    fn computer_system() -> ClassDefinition {
        ClassDefinition::new("root/cimv2", "CIM_ComputerSystem")
            .with_super_class("CIM_System")
            .with_qualifier(QualifierDecl::new("Description", "A computer"))
            .with_property(PropertyDecl::new("CreationClassName", CimType::String).key())
            .with_property(PropertyDecl::new("Name", CimType::String).key())
            .with_property(
                PropertyDecl::new("Caption", CimType::String)
                    .with_default("system")
                    .with_origin("CIM_ManagedElement")
                    .propagated(),
            )
            .with_property(PropertyDecl::array("Roles", CimType::String))
            .with_property(PropertyDecl::new("Dedicated", CimType::Uint16).with_default(0u16))
    }

    #[test]
    fn header_and_lookup() {
        let class = ScmoClass::build(&computer_system()).unwrap();
        assert_eq!(class.class_name(), "CIM_ComputerSystem");
        assert_eq!(class.namespace(), "root/cimv2");
        assert_eq!(class.super_class_name(), Some("CIM_System"));
        assert!(!class.is_empty());
        assert_eq!(class.property_count(), 5);
        assert_eq!(class.find_property("caption").unwrap(), 2);
        assert!(matches!(
            class.find_property("Nope"),
            Err(ScmoError::NotFound { .. })
        ));
        assert_eq!(class.qualifiers().unwrap()[0].name, "Description");
    }

    #[test]
    fn property_records() {
        let class = ScmoClass::build(&computer_system()).unwrap();
        let caption = class.property("CAPTION").unwrap();
        assert_eq!(caption.name, "Caption");
        assert_eq!(caption.default, CimValue::from("system"));
        assert_eq!(caption.class_origin.as_deref(), Some("CIM_ManagedElement"));
        assert!(caption.propagated);
        assert!(!caption.is_key);

        let roles = class.property_at(3).unwrap();
        assert!(roles.is_array);
        assert_eq!(roles.default, CimValue::null_array(CimType::String));
        assert_eq!(roles.class_origin.as_deref(), Some("CIM_ComputerSystem"));

        assert!(matches!(
            class.property_at(5),
            Err(ScmoError::IndexOutOfBound { index: 5, count: 5 })
        ));
    }

    #[test]
    fn keys_follow_declaration_order() {
        let class = ScmoClass::build(&computer_system()).unwrap();
        assert_eq!(class.key_binding_count(), 2);
        assert_eq!(class.key_names(), vec!["CreationClassName", "Name"]);
        assert_eq!(class.key_index_list(), vec![0, 1]);
        assert!(class.is_property_key(0));
        assert!(class.is_property_key(1));
        assert!(!class.is_property_key(2));
        assert_eq!(class.find_key_binding("name").unwrap(), 1);
        assert_eq!(
            class.key_binding_at(1).unwrap(),
            ClassKeyBinding {
                name: "Name".into(),
                cim_type: CimType::String
            }
        );
    }

    #[test]
    fn key_mask_spans_words() {
        let mut def = ClassDefinition::new("root", "Wide");
        for i in 0..70 {
            let p = PropertyDecl::new(format!("p{}", i), CimType::Uint32);
            def = def.with_property(if i == 65 { p.key() } else { p });
        }
        let class = ScmoClass::build(&def).unwrap();
        assert!(class.is_property_key(65));
        assert!(!class.is_property_key(1));
        assert_eq!(class.key_names(), vec!["p65"]);
    }

    #[test]
    fn duplicate_property_names_fail() {
        let def = ClassDefinition::new("root", "Dup")
            .with_property(PropertyDecl::new("Name", CimType::String))
            .with_property(PropertyDecl::new("NAME", CimType::Uint8));
        assert!(matches!(
            ScmoClass::build(&def),
            Err(ScmoError::AlreadyExists { .. })
        ));

        // Kelvin sign lower-cases to 'k'
        let def = ClassDefinition::new("root", "Dup")
            .with_property(PropertyDecl::new("\u{212A}", CimType::Real64))
            .with_property(PropertyDecl::new("k", CimType::Real64));
        assert!(matches!(
            ScmoClass::build(&def),
            Err(ScmoError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn illegal_keys_and_defaults() {
        let def = ClassDefinition::new("root", "Bad")
            .with_property(PropertyDecl::new("Embedded", CimType::Object).key());
        assert!(matches!(
            ScmoClass::build(&def),
            Err(ScmoError::InvalidParameter { .. })
        ));

        let def = ClassDefinition::new("root", "Bad")
            .with_property(PropertyDecl::new("Count", CimType::Uint32).with_default("x"));
        assert!(matches!(
            ScmoClass::build(&def),
            Err(ScmoError::TypeMismatch { .. })
        ));

        let def = ClassDefinition::new("root", "Bad")
            .with_property(PropertyDecl::array("Counts", CimType::Uint32).with_default(1u32));
        assert!(matches!(
            ScmoClass::build(&def),
            Err(ScmoError::IsAnArray { .. })
        ));
    }

    #[test]
    fn type_and_origin_checks() {
        let def = computer_system().with_property(PropertyDecl::new("Payload", CimType::Object));
        let class = ScmoClass::build(&def).unwrap();
        let payload = class.find_property("Payload").unwrap();
        assert!(class.is_node_same_type(payload, CimType::Instance, false).is_ok());
        assert!(matches!(
            class.is_node_same_type(0, CimType::Uint8, false),
            Err(ScmoError::TypeMismatch { .. })
        ));
        assert!(matches!(
            class.is_node_same_type(0, CimType::String, true),
            Err(ScmoError::NotAnArray { .. })
        ));
        assert!(matches!(
            class.is_node_same_type(3, CimType::String, false),
            Err(ScmoError::IsAnArray { .. })
        ));

        assert!(class.is_same_origin(2, "cim_managedelement").is_ok());
        assert!(matches!(
            class.is_same_origin(2, "CIM_Other"),
            Err(ScmoError::NotSameOrigin { .. })
        ));
    }

    #[test]
    fn bytes_round_trip() {
        let class = ScmoClass::build(&computer_system()).unwrap();
        let copy = ScmoClass::from_bytes(class.as_bytes(), &EngineConfig::default()).unwrap();
        assert!(!copy.is_same(&class));
        assert_eq!(copy.class_name(), class.class_name());
        for i in 0..class.property_count() {
            assert_eq!(copy.property_at(i).unwrap(), class.property_at(i).unwrap());
        }
        assert_eq!(copy.find_property("roles").unwrap(), 3);
    }

    fn patched(class: &ScmoClass, at: usize, value: u64) -> Vec<u8> {
        let mut bytes = class.as_bytes().to_vec();
        bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
        bytes
    }

    #[test]
    fn corrupt_pointers_are_rejected() {
        let class = ScmoClass::build(&computer_system()).unwrap();
        let config = EngineConfig::default();
        let node_array = CLS_PROPERTY_SET + set_node_array(PROPERTY_HASH_SIZE);
        for (at, value) in [
            (CLS_KEY_MASK, 0x7fff_ffff),
            (CLS_KEY_INDEX_LIST, 0x7fff_ffff),
            (node_array, u64::MAX),
            (CLS_KEY_SET + set_node_array(KEY_BINDING_HASH_SIZE), u64::MAX - 8),
        ] {
            let bytes = patched(&class, at, value);
            assert!(matches!(
                ScmoClass::from_bytes(&bytes, &config),
                Err(ScmoError::InvalidChunk { .. })
            ));
        }

        let list = class.chunk().read_ptr(CLS_KEY_INDEX_LIST).start as usize;
        let mut bytes = class.as_bytes().to_vec();
        bytes[list..list + 4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            ScmoClass::from_bytes(&bytes, &config),
            Err(ScmoError::InvalidChunk { .. })
        ));

        // a wild name pointer reads as an empty name instead of panicking
        let node = class.chunk().read_ptr(node_array).start as usize;
        let bytes = patched(&class, node + NODE_NAME, u64::MAX);
        let copy = ScmoClass::from_bytes(&bytes, &config).unwrap();
        assert_eq!(copy.property_name_at(0).unwrap(), "");
    }

    #[test]
    fn empty_class() {
        let class = ScmoClass::empty("root/x", "Unknown").unwrap();
        assert!(class.is_empty());
        assert_eq!(class.property_count(), 0);
        assert_eq!(class.key_binding_count(), 0);
        assert!(class.find_property("a").is_err());
    }

    #[test]
    fn handles_share_one_chunk() {
        let class = ScmoClass::build(&computer_system()).unwrap();
        let other = class.clone();
        assert!(other.is_same(&class));
        assert_eq!(class.ref_count(), 2);
        drop(other);
        assert_eq!(class.ref_count(), 1);
    }
}
