use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cell::{self, read_cell, read_union, write_cell, write_union};
use crate::class::ScmoClass;
use crate::config::{EngineConfig, UnmatchedPolicy};
use crate::error::{Result, ScmoError};
use crate::memory::layout::*;
use crate::memory::Chunk;
use crate::ordered_set::names_equal;
use crate::path::{ObjectPath, PathKeyBinding};
use crate::types::{CimDateTime, CimType, KeyBindingType};
use crate::value::{CimValue, Scalar};

/// An instance laid out in one chunk and bound to a shared class.
///
/// Cloning the handle shares the chunk. The first mutation through a shared
/// handle copies the chunk, so other handles never observe the change.
#[derive(Clone)]
pub struct ScmoInstance {
    inner: Arc<InstanceInner>,
}

#[derive(Clone)]
struct InstanceInner {
    class: ScmoClass,
    chunk: Chunk,
    config: EngineConfig,
}

/// A property value read from an instance. Unset properties carry the
/// class default with `is_set == false`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub name: String,
    pub value: CimValue,
    pub is_set: bool,
}

impl PropertyValue {
    pub fn scalar(&self) -> Result<&Scalar> {
        self.value.scalar(&self.name)
    }

    pub fn elements(&self) -> Result<&[Scalar]> {
        self.value.elements(&self.name)
    }

    pub fn element(&self, index: usize) -> Result<&Scalar> {
        self.value.element(&self.name, index)
    }

    pub fn string(&self) -> Result<&str> {
        self.value.string(&self.name)
    }

    pub fn uint(&self) -> Result<u64> {
        self.value.uint(&self.name)
    }

    pub fn sint(&self) -> Result<i64> {
        self.value.sint(&self.name)
    }

    pub fn real(&self) -> Result<f64> {
        self.value.real(&self.name)
    }

    pub fn boolean(&self) -> Result<bool> {
        self.value.boolean(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyBindingValue {
    pub name: String,
    pub cim_type: CimType,
    pub value: Scalar,
}

impl fmt::Debug for ScmoInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScmoInstance")
            .field("namespace", &self.namespace())
            .field("class_name", &self.class_name())
            .field("properties", &self.property_count())
            .field("chunk", &self.inner.chunk)
            .finish()
    }
}

impl ScmoInstance {
    // === Construction ===

    pub fn new(class: &ScmoClass) -> Result<ScmoInstance> {
        Self::with_config(class, &EngineConfig::default())
    }

    /// An instance with every property and key binding unset. Binding to an
    /// empty class marks the instance as having no class.
    pub fn with_config(class: &ScmoClass, config: &EngineConfig) -> Result<ScmoInstance> {
        let config = config.normalized();
        let mut chunk = Chunk::new(
            INSTANCE_MAGIC,
            INSTANCE_MAIN_SIZE,
            config.initial_chunk_size,
            config.ext_ref_growth,
        );
        chunk.set_str(INST_NAMESPACE, class.namespace())?;
        chunk.set_str(INST_CLASS_NAME, class.class_name())?;

        let keys = class.key_binding_count();
        let key_array = chunk.alloc(keys * KBV_SIZE)?;
        chunk.write_ptr(INST_KEY_BINDING_ARRAY, key_array);
        chunk.write_u32(INST_NUMBER_KEYS, keys as u32);

        let props = class.property_count();
        let prop_array = chunk.alloc(props * CELL_SIZE)?;
        chunk.write_ptr(INST_PROPERTY_ARRAY, prop_array);
        chunk.write_u32(INST_NUMBER_PROPERTIES, props as u32);

        if class.is_empty() {
            chunk.write_u32(INST_FLAGS, INST_FLAG_NO_CLASS);
        }

        Ok(ScmoInstance {
            inner: Arc::new(InstanceInner {
                class: class.clone(),
                chunk,
                config,
            }),
        })
    }

    /// An instance whose class could not be resolved. Every property and
    /// key binding set on it becomes user-defined.
    pub fn without_class(namespace: &str, class_name: &str, config: &EngineConfig) -> Result<ScmoInstance> {
        Self::with_config(&ScmoClass::empty(namespace, class_name)?, config)
    }

    /// Builds an instance of `class` from supplied values. Names the class
    /// does not declare follow the configured unmatched policy; key
    /// properties that were set also fill their unset key bindings.
    pub fn bind<P, K, S, T>(
        class: &ScmoClass,
        properties: P,
        key_bindings: K,
        config: &EngineConfig,
    ) -> Result<ScmoInstance>
    where
        P: IntoIterator<Item = (S, CimValue)>,
        K: IntoIterator<Item = (T, Scalar)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut instance = Self::with_config(class, config)?;
        let policy = config.unmatched_property_policy;
        for (name, value) in properties {
            let name = name.as_ref();
            unmatched(policy, class, name, instance.set_property(name, value))?;
        }
        for (name, value) in key_bindings {
            let name = name.as_ref();
            unmatched(policy, class, name, instance.set_key_binding(name, value))?;
        }
        instance.build_key_bindings_from_properties()?;
        debug!(
            class = %class.class_name(),
            properties = instance.property_count(),
            keys = instance.key_binding_count(),
            "bound instance"
        );
        Ok(instance)
    }

    /// Reassembles an instance from a chunk read back from a stream.
    pub(crate) fn from_parts(class: ScmoClass, chunk: Chunk, config: &EngineConfig) -> Result<ScmoInstance> {
        let keys = chunk.read_u32(INST_NUMBER_KEYS) as usize;
        let props = chunk.read_u32(INST_NUMBER_PROPERTIES) as usize;
        if keys != class.key_binding_count() || props != class.property_count() {
            return Err(ScmoError::invalid_chunk(format!(
                "instance of {} has {} keys and {} properties, class has {} and {}",
                class.class_name(),
                keys,
                props,
                class.key_binding_count(),
                class.property_count()
            )));
        }
        if keys > 0 {
            chunk.check_ptr(chunk.read_ptr(INST_KEY_BINDING_ARRAY), keys * KBV_SIZE)?;
        }
        if props > 0 {
            chunk.check_ptr(chunk.read_ptr(INST_PROPERTY_ARRAY), props * CELL_SIZE)?;
        }
        check_list(&chunk, INST_USER_PROPERTY_ELEMENT, INST_NUMBER_USER_PROPERTIES, UPROP_SIZE)?;
        check_list(&chunk, INST_USER_KEY_ELEMENT, INST_NUMBER_USER_KEYS, UKEY_SIZE)?;
        Ok(ScmoInstance {
            inner: Arc::new(InstanceInner {
                class,
                chunk,
                config: config.normalized(),
            }),
        })
    }

    pub(crate) fn chunk(&self) -> &Chunk {
        &self.inner.chunk
    }

    /// The used region of the chunk.
    pub fn as_bytes(&self) -> &[u8] {
        self.chunk().used_bytes()
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut Arc::make_mut(&mut self.inner).chunk
    }

    // === Identity and header ===

    pub fn class(&self) -> &ScmoClass {
        &self.inner.class
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn is_same(&self, other: &ScmoInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn namespace(&self) -> &str {
        self.chunk().str_field(INST_NAMESPACE).unwrap_or("")
    }

    pub fn class_name(&self) -> &str {
        self.chunk().str_field(INST_CLASS_NAME).unwrap_or("")
    }

    pub fn host_name(&self) -> Option<&str> {
        self.chunk().str_field(INST_HOST_NAME)
    }

    pub fn set_host_name(&mut self, host: &str) -> Result<()> {
        self.chunk_mut().set_str(INST_HOST_NAME, host)
    }

    /// Overrides the class namespace for this instance.
    pub fn set_namespace(&mut self, namespace: &str) -> Result<()> {
        let chunk = self.chunk_mut();
        chunk.set_str(INST_NAMESPACE, namespace)?;
        set_flag(chunk, INST_FLAG_IS_COMPROMISED, true);
        Ok(())
    }

    /// Overrides the class name for this instance.
    pub fn set_class_name(&mut self, class_name: &str) -> Result<()> {
        let chunk = self.chunk_mut();
        chunk.set_str(INST_CLASS_NAME, class_name)?;
        set_flag(chunk, INST_FLAG_IS_COMPROMISED, true);
        Ok(())
    }

    fn flag(&self, bit: u32) -> bool {
        self.chunk().read_u32(INST_FLAGS) & bit != 0
    }

    pub fn is_compromised(&self) -> bool {
        self.flag(INST_FLAG_IS_COMPROMISED)
    }

    pub fn no_class_for_instance(&self) -> bool {
        self.flag(INST_FLAG_NO_CLASS)
    }

    pub fn include_qualifiers(&self) -> bool {
        self.flag(INST_FLAG_INCLUDE_QUALIFIERS)
    }

    pub fn set_include_qualifiers(&mut self, on: bool) {
        set_flag(self.chunk_mut(), INST_FLAG_INCLUDE_QUALIFIERS, on);
    }

    pub fn include_class_origin(&self) -> bool {
        self.flag(INST_FLAG_INCLUDE_CLASS_ORIGIN)
    }

    pub fn set_include_class_origin(&mut self, on: bool) {
        set_flag(self.chunk_mut(), INST_FLAG_INCLUDE_CLASS_ORIGIN, on);
    }

    pub fn is_class_only(&self) -> bool {
        self.flag(INST_FLAG_IS_CLASS_ONLY)
    }

    pub fn set_class_only(&mut self, on: bool) {
        set_flag(self.chunk_mut(), INST_FLAG_IS_CLASS_ONLY, on);
    }

    pub fn export_set_only(&self) -> bool {
        self.flag(INST_FLAG_EXPORT_SET_ONLY)
    }

    pub fn set_export_set_only(&mut self, on: bool) {
        set_flag(self.chunk_mut(), INST_FLAG_EXPORT_SET_ONLY, on);
    }

    // === Properties ===

    fn class_property_count(&self) -> usize {
        self.chunk().read_u32(INST_NUMBER_PROPERTIES) as usize
    }

    fn property_cell(&self, index: usize) -> usize {
        self.chunk().read_ptr(INST_PROPERTY_ARRAY).start as usize + index * CELL_SIZE
    }

    pub fn property_count(&self) -> usize {
        self.class_property_count() + self.chunk().read_u32(INST_NUMBER_USER_PROPERTIES) as usize
    }

    fn user_properties(&self) -> Vec<usize> {
        list_elements(
            self.chunk(),
            INST_USER_PROPERTY_ELEMENT,
            INST_NUMBER_USER_PROPERTIES,
        )
    }

    fn find_user_property(&self, name: &str) -> Option<(usize, usize)> {
        self.user_properties()
            .into_iter()
            .enumerate()
            .find(|(_, at)| names_equal(self.chunk().str_field(at + UPROP_NAME).unwrap_or(""), name))
    }

    pub fn property_index(&self, name: &str) -> Result<usize> {
        if let Ok(index) = self.class().find_property(name) {
            return Ok(index);
        }
        self.find_user_property(name)
            .map(|(pos, _)| self.class_property_count() + pos)
            .ok_or_else(|| ScmoError::not_found(name))
    }

    pub fn property(&self, name: &str) -> Result<PropertyValue> {
        self.property_at(self.property_index(name)?)
    }

    pub fn property_at(&self, index: usize) -> Result<PropertyValue> {
        let class_count = self.class_property_count();
        if index < class_count {
            let name = self.class().property_name_at(index)?.to_string();
            let at = self.property_cell(index);
            if cell::is_set(self.chunk(), at) {
                return Ok(PropertyValue {
                    name,
                    value: read_cell(self.chunk(), at)?,
                    is_set: true,
                });
            }
            return Ok(PropertyValue {
                name,
                value: self.class().default_value(index)?,
                is_set: false,
            });
        }
        let users = self.user_properties();
        let at = *users.get(index - class_count).ok_or(ScmoError::IndexOutOfBound {
            index,
            count: class_count + users.len(),
        })?;
        Ok(PropertyValue {
            name: self.chunk().str_field(at + UPROP_NAME).unwrap_or("").to_string(),
            value: read_cell(self.chunk(), at + UPROP_VALUE)?,
            is_set: true,
        })
    }

    /// Class origin recorded for a property, if any.
    pub fn property_origin(&self, name: &str) -> Result<Option<String>> {
        if let Ok(index) = self.class().find_property(name) {
            return Ok(self.class().property_origin(index)?.map(str::to_string));
        }
        let (_, at) = self
            .find_user_property(name)
            .ok_or_else(|| ScmoError::not_found(name))?;
        Ok(self.chunk().str_field(at + UPROP_ORIGIN).map(str::to_string))
    }

    pub fn set_property(&mut self, name: &str, value: CimValue) -> Result<()> {
        self.set_property_with_origin(name, value, None)
    }

    /// Sets a property by name. With `origin`, the property must originate
    /// from that class.
    pub fn set_property_with_origin(
        &mut self,
        name: &str,
        value: CimValue,
        origin: Option<&str>,
    ) -> Result<()> {
        value.validate(name)?;
        if let Ok(index) = self.class().find_property(name) {
            if let Some(origin) = origin {
                self.class().is_same_origin(index, origin)?;
            }
            return self.set_property_at(index, value);
        }
        if !self.no_class_for_instance() {
            return Err(ScmoError::not_found(name));
        }
        self.set_user_property(name, value, origin)
    }

    /// Sets the class property at `index`.
    pub fn set_property_at(&mut self, index: usize, value: CimValue) -> Result<()> {
        let count = self.class_property_count();
        if index >= count {
            return Err(ScmoError::IndexOutOfBound { index, count });
        }
        let name = self.class().property_name_at(index)?.to_string();
        value.validate(&name)?;
        self.class()
            .is_node_same_type(index, value.cim_type(), value.is_array())?;
        let (declared, _) = self.class().property_type_at(index)?;
        let at = self.property_cell(index);
        write_cell(self.chunk_mut(), at, &value.retagged(declared), true)
    }

    fn set_user_property(&mut self, name: &str, value: CimValue, origin: Option<&str>) -> Result<()> {
        let existing = self.find_user_property(name).map(|(_, at)| at);
        if let Some(at) = existing {
            let header = cell::read_header(self.chunk(), at + UPROP_VALUE)?;
            let supplied = value.cim_type();
            if header.cim_type != supplied
                && !(header.cim_type == CimType::Object && supplied == CimType::Instance)
            {
                return Err(ScmoError::TypeMismatch {
                    name: name.to_string(),
                    declared: header.cim_type.to_string(),
                    supplied: supplied.to_string(),
                });
            }
            if header.is_array != value.is_array() {
                let name = name.to_string();
                return Err(if header.is_array {
                    ScmoError::IsAnArray { name }
                } else {
                    ScmoError::NotAnArray { name }
                });
            }
            if let (Some(origin), Some(own)) = (origin, self.chunk().str_field(at + UPROP_ORIGIN)) {
                if !names_equal(own, origin) {
                    return Err(ScmoError::NotSameOrigin {
                        name: name.to_string(),
                        origin: origin.to_string(),
                    });
                }
            }
            let value = value.retagged(header.cim_type);
            return write_cell(self.chunk_mut(), at + UPROP_VALUE, &value, true);
        }

        let chunk = self.chunk_mut();
        let at = list_append(
            chunk,
            INST_USER_PROPERTY_ELEMENT,
            INST_NUMBER_USER_PROPERTIES,
            UPROP_SIZE,
        )?;
        chunk.set_str(at + UPROP_NAME, name)?;
        if let Some(origin) = origin {
            chunk.set_str(at + UPROP_ORIGIN, origin)?;
        }
        write_cell(chunk, at + UPROP_VALUE, &value, true)
    }

    // === Key bindings ===

    fn class_key_count(&self) -> usize {
        self.chunk().read_u32(INST_NUMBER_KEYS) as usize
    }

    fn key_value_at(&self, index: usize) -> usize {
        self.chunk().read_ptr(INST_KEY_BINDING_ARRAY).start as usize + index * KBV_SIZE
    }

    fn user_keys(&self) -> Vec<usize> {
        list_elements(self.chunk(), INST_USER_KEY_ELEMENT, INST_NUMBER_USER_KEYS)
    }

    fn find_user_key(&self, name: &str) -> Option<usize> {
        self.user_keys()
            .into_iter()
            .find(|at| names_equal(self.chunk().str_field(at + UKEY_NAME).unwrap_or(""), name))
    }

    pub fn key_binding_count(&self) -> usize {
        self.class_key_count() + self.chunk().read_u32(INST_NUMBER_USER_KEYS) as usize
    }

    /// Sets a key binding. Numeric values are accepted in their widest form
    /// (`Uint64`, `Sint64`, `Real64`) for narrower keys.
    pub fn set_key_binding(&mut self, name: &str, value: Scalar) -> Result<()> {
        if let Ok(index) = self.class().find_key_binding(name) {
            return self.set_key_binding_at(index, value);
        }
        if !self.no_class_for_instance() {
            return Err(ScmoError::not_found(name));
        }
        if value.cim_type().key_binding_type().is_none() {
            return Err(ScmoError::invalid_parameter(
                name,
                format!("a {} value cannot be a key", value.cim_type()),
            ));
        }
        self.set_user_key(name, value)
    }

    pub fn set_key_binding_at(&mut self, index: usize, value: Scalar) -> Result<()> {
        let count = self.class_key_count();
        if index >= count {
            return Err(ScmoError::IndexOutOfBound { index, count });
        }
        let key = self.class().key_binding_at(index)?;
        let value = coerce_key(&key.name, key.cim_type, value)?;
        let at = self.key_value_at(index);
        write_key_value(self.chunk_mut(), at, &value)
    }

    /// Sets a key binding from its textual form.
    pub fn set_key_binding_from_str(&mut self, name: &str, kind: KeyBindingType, text: &str) -> Result<()> {
        if let Ok(index) = self.class().find_key_binding(name) {
            let key = self.class().key_binding_at(index)?;
            if key.cim_type.key_binding_type() != Some(kind) {
                return Err(ScmoError::TypeMismatch {
                    name: name.to_string(),
                    declared: key.cim_type.to_string(),
                    supplied: format!("{:?}", kind).to_lowercase(),
                });
            }
            let value = parse_scalar(name, key.cim_type, text)?;
            return self.set_key_binding_at(index, value);
        }
        if !self.no_class_for_instance() {
            return Err(ScmoError::not_found(name));
        }
        let value = parse_scalar(name, kind.default_cim_type(text), text)?;
        self.set_user_key(name, value)
    }

    fn set_user_key(&mut self, name: &str, value: Scalar) -> Result<()> {
        if let Some(at) = self.find_user_key(name) {
            let declared = CimType::from_u32(self.chunk().read_u32(at + UKEY_TYPE))
                .ok_or_else(|| ScmoError::invalid_chunk("bad user key type"))?;
            let value = coerce_key(name, declared, value)?;
            return write_key_value(self.chunk_mut(), at + UKEY_VALUE, &value);
        }
        let chunk = self.chunk_mut();
        let at = list_append(chunk, INST_USER_KEY_ELEMENT, INST_NUMBER_USER_KEYS, UKEY_SIZE)?;
        chunk.write_u32(at + UKEY_TYPE, value.cim_type() as u32);
        chunk.set_str(at + UKEY_NAME, name)?;
        write_key_value(chunk, at + UKEY_VALUE, &value)
    }

    pub fn key_binding(&self, name: &str) -> Result<KeyBindingValue> {
        if let Ok(index) = self.class().find_key_binding(name) {
            return self.key_binding_at(index);
        }
        let at = self.find_user_key(name).ok_or_else(|| ScmoError::not_found(name))?;
        self.user_key_at(at)
    }

    pub fn key_binding_at(&self, index: usize) -> Result<KeyBindingValue> {
        let class_count = self.class_key_count();
        if index < class_count {
            let key = self.class().key_binding_at(index)?;
            let at = self.key_value_at(index);
            if self.chunk().read_u32(at + KBV_IS_SET) == 0 {
                return Err(ScmoError::NullValue { name: key.name });
            }
            let value = read_union(self.chunk(), at + KBV_UNION, key.cim_type)?;
            return Ok(KeyBindingValue {
                name: key.name,
                cim_type: key.cim_type,
                value,
            });
        }
        let users = self.user_keys();
        let at = *users.get(index - class_count).ok_or(ScmoError::IndexOutOfBound {
            index,
            count: class_count + users.len(),
        })?;
        self.user_key_at(at)
    }

    fn user_key_at(&self, at: usize) -> Result<KeyBindingValue> {
        let name = self.chunk().str_field(at + UKEY_NAME).unwrap_or("").to_string();
        let tag = self.chunk().read_u32(at + UKEY_TYPE);
        let cim_type = CimType::from_u32(tag)
            .ok_or_else(|| ScmoError::invalid_chunk(format!("unknown key type tag {}", tag)))?;
        if self.chunk().read_u32(at + UKEY_VALUE + KBV_IS_SET) == 0 {
            return Err(ScmoError::NullValue { name });
        }
        let value = read_union(self.chunk(), at + UKEY_VALUE + KBV_UNION, cim_type)?;
        Ok(KeyBindingValue {
            name,
            cim_type,
            value,
        })
    }

    /// Marks every key binding unset.
    pub fn clear_key_bindings(&mut self) {
        let mut slots: Vec<usize> = (0..self.class_key_count())
            .map(|i| self.key_value_at(i))
            .collect();
        slots.extend(self.user_keys().into_iter().map(|at| at + UKEY_VALUE));
        let chunk = self.chunk_mut();
        for at in slots {
            chunk.remove_ext_ref(at + KBV_UNION);
            chunk.write_u32(at + KBV_IS_SET, 0);
        }
    }

    /// Fills unset key bindings from the matching key properties that are
    /// set and not null.
    pub fn build_key_bindings_from_properties(&mut self) -> Result<()> {
        let key_props = self.class().key_index_list();
        for (k, prop) in key_props.into_iter().enumerate() {
            let at = self.key_value_at(k);
            if self.chunk().read_u32(at + KBV_IS_SET) != 0 {
                continue;
            }
            let prop_at = self.property_cell(prop as usize);
            if !cell::is_set(self.chunk(), prop_at) {
                continue;
            }
            if let CimValue::Scalar(value) = read_cell(self.chunk(), prop_at)? {
                write_key_value(self.chunk_mut(), at, &value)?;
            }
        }
        Ok(())
    }

    // === Paths ===

    pub fn object_path(&self) -> ObjectPath {
        let keys = (0..self.key_binding_count())
            .filter_map(|i| self.key_binding_at(i).ok())
            .filter_map(|k| {
                let kind = k.cim_type.key_binding_type()?;
                Some(PathKeyBinding::new(k.name, k.value.to_string(), kind))
            })
            .collect();
        ObjectPath::new(
            self.host_name().map(str::to_string),
            self.namespace(),
            self.class_name(),
            keys,
        )
    }

    /// `Class.key="value",...` with keys sorted by name.
    pub fn to_canonical_path(&self) -> String {
        self.object_path().to_canonical_path()
    }

    /// A new instance of the same class carrying only the host, the
    /// namespace and class name overrides and the key bindings.
    pub fn clone_path_only(&self) -> Result<ScmoInstance> {
        let mut copy = ScmoInstance::with_config(self.class(), &self.inner.config)?;
        if let Some(host) = self.host_name() {
            copy.set_host_name(host)?;
        }
        if self.is_compromised() {
            copy.set_namespace(self.namespace())?;
            copy.set_class_name(self.class_name())?;
        }
        for i in 0..self.key_binding_count() {
            match self.key_binding_at(i) {
                Ok(key) if i < self.class_key_count() => copy.set_key_binding_at(i, key.value)?,
                Ok(key) => copy.set_user_key(&key.name, key.value)?,
                Err(ScmoError::NullValue { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(copy)
    }

    // === External references ===

    pub fn external_reference_count(&self) -> usize {
        self.chunk().ext_ref_count()
    }

    pub fn external_reference(&self, index: usize) -> Result<ScmoInstance> {
        let count = self.external_reference_count();
        if index >= count {
            return Err(ScmoError::IndexOutOfBound { index, count });
        }
        let chunk = self.chunk();
        chunk
            .ext_ref_at(chunk.ext_ref_offset(index))
            .cloned()
            .ok_or_else(|| ScmoError::invalid_chunk(format!("external reference {} released", index)))
    }

    /// Slot and target of every registered external reference, in index
    /// array order.
    pub(crate) fn external_slots(&self) -> Vec<(u32, ScmoInstance)> {
        let chunk = self.chunk();
        (0..chunk.ext_ref_count())
            .filter_map(|i| {
                let at = chunk.ext_ref_offset(i);
                let target = chunk.ext_ref_at(at)?.clone();
                Some((chunk.read_u32(at), target))
            })
            .collect()
    }

    /// Releases every embedded sub-instance held by this handle's chunk.
    /// Values that referenced them can no longer be read. Idempotent.
    pub fn release_external_references(&mut self) {
        self.chunk_mut().release_ext_refs();
    }
}

fn unmatched(policy: UnmatchedPolicy, class: &ScmoClass, name: &str, result: Result<()>) -> Result<()> {
    match result {
        Err(ScmoError::NotFound { .. }) if policy == UnmatchedPolicy::Drop => {
            warn!(class = %class.class_name(), name, "dropping value not declared by class");
            Ok(())
        }
        other => other,
    }
}

fn set_flag(chunk: &mut Chunk, bit: u32, on: bool) {
    let flags = chunk.read_u32(INST_FLAGS);
    chunk.write_u32(INST_FLAGS, if on { flags | bit } else { flags & !bit });
}

fn write_key_value(chunk: &mut Chunk, at: usize, value: &Scalar) -> Result<()> {
    chunk.remove_ext_ref(at + KBV_UNION);
    write_union(chunk, at + KBV_UNION, value)?;
    chunk.write_u32(at + KBV_IS_SET, 1);
    Ok(())
}

/// Offsets of the elements of a user-defined list, head first.
fn list_elements(chunk: &Chunk, head_at: usize, count_at: usize) -> Vec<usize> {
    let count = chunk.read_u32(count_at) as usize;
    let mut out = Vec::with_capacity(count);
    let mut next = chunk.read_ptr(head_at);
    while !next.is_null() && out.len() < count {
        let at = next.start as usize;
        out.push(at);
        next = chunk.read_ptr(at + UPROP_NEXT);
    }
    out
}

/// Checks every element of a user-defined list read from bytes lies inside
/// the chunk and that the chain holds exactly the recorded count.
fn check_list(chunk: &Chunk, head_at: usize, count_at: usize, size: usize) -> Result<()> {
    let count = chunk.read_u32(count_at) as usize;
    let mut next = chunk.read_ptr(head_at);
    for i in 0..count {
        if next.is_null() {
            return Err(ScmoError::invalid_chunk(format!(
                "user list ends after {} of {} elements",
                i, count
            )));
        }
        chunk.check_ptr(next, size)?;
        next = chunk.read_ptr(next.start as usize + UPROP_NEXT);
    }
    Ok(())
}

/// Appends a zeroed element at the tail of a user-defined list.
fn list_append(chunk: &mut Chunk, head_at: usize, count_at: usize, size: usize) -> Result<usize> {
    let tail = list_elements(chunk, head_at, count_at).last().copied();
    let element = chunk.alloc(size)?;
    match tail {
        Some(tail) => chunk.write_ptr(tail + UPROP_NEXT, element),
        None => chunk.write_ptr(head_at, element),
    }
    let count = chunk.read_u32(count_at);
    chunk.write_u32(count_at, count + 1);
    Ok(element.start as usize)
}

fn coerce_key(name: &str, declared: CimType, value: Scalar) -> Result<Scalar> {
    if value.cim_type() == declared {
        return Ok(value);
    }
    let mismatch = || ScmoError::TypeMismatch {
        name: name.to_string(),
        declared: declared.to_string(),
        supplied: value.cim_type().to_string(),
    };
    let coerced = match (&value, declared) {
        (Scalar::Uint64(v), CimType::Uint8) => narrow(name, declared, *v, Scalar::Uint8)?,
        (Scalar::Uint64(v), CimType::Uint16) => narrow(name, declared, *v, Scalar::Uint16)?,
        (Scalar::Uint64(v), CimType::Uint32) => narrow(name, declared, *v, Scalar::Uint32)?,
        (Scalar::Sint64(v), CimType::Sint8) => narrow(name, declared, *v, Scalar::Sint8)?,
        (Scalar::Sint64(v), CimType::Sint16) => narrow(name, declared, *v, Scalar::Sint16)?,
        (Scalar::Sint64(v), CimType::Sint32) => narrow(name, declared, *v, Scalar::Sint32)?,
        (Scalar::Real64(v), CimType::Real32) => Scalar::Real32(*v as f32),
        (Scalar::Instance(i), CimType::Reference) | (Scalar::Object(i), CimType::Reference) => {
            Scalar::Reference(i.clone())
        }
        _ => return Err(mismatch()),
    };
    Ok(coerced)
}

fn narrow<V, T>(name: &str, declared: CimType, v: V, wrap: fn(T) -> Scalar) -> Result<Scalar>
where
    V: Copy + fmt::Display,
    T: TryFrom<V>,
{
    T::try_from(v).map(wrap).map_err(|_| {
        ScmoError::invalid_parameter(name, format!("{} does not fit a {} key", v, declared))
    })
}

fn parse_scalar(name: &str, cim_type: CimType, text: &str) -> Result<Scalar> {
    let bad = || ScmoError::invalid_parameter(name, format!("'{}' is not a valid {}", text, cim_type));
    let t = text.trim();
    let value = match cim_type {
        CimType::Boolean => {
            if t.eq_ignore_ascii_case("true") {
                Scalar::Boolean(true)
            } else if t.eq_ignore_ascii_case("false") {
                Scalar::Boolean(false)
            } else {
                return Err(bad());
            }
        }
        CimType::Uint8 => Scalar::Uint8(t.parse().map_err(|_| bad())?),
        CimType::Sint8 => Scalar::Sint8(t.parse().map_err(|_| bad())?),
        CimType::Uint16 => Scalar::Uint16(t.parse().map_err(|_| bad())?),
        CimType::Sint16 => Scalar::Sint16(t.parse().map_err(|_| bad())?),
        CimType::Uint32 => Scalar::Uint32(t.parse().map_err(|_| bad())?),
        CimType::Sint32 => Scalar::Sint32(t.parse().map_err(|_| bad())?),
        CimType::Uint64 => Scalar::Uint64(t.parse().map_err(|_| bad())?),
        CimType::Sint64 => Scalar::Sint64(t.parse().map_err(|_| bad())?),
        CimType::Real32 => Scalar::Real32(t.parse().map_err(|_| bad())?),
        CimType::Real64 => Scalar::Real64(t.parse().map_err(|_| bad())?),
        CimType::Char16 => {
            let mut units = text.encode_utf16();
            match (units.next(), units.next()) {
                (Some(u), None) => Scalar::Char16(u),
                _ => return Err(bad()),
            }
        }
        CimType::String => Scalar::String(text.to_string()),
        CimType::DateTime => Scalar::DateTime(CimDateTime::parse(text)?),
        CimType::Reference | CimType::Object | CimType::Instance => {
            return Err(ScmoError::invalid_parameter(
                name,
                "reference keys must be set from an instance, not text",
            ))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ClassDefinition, PropertyDecl};

    fn foo(id_first: bool) -> ScmoClass {
        let id = PropertyDecl::new("id", CimType::String).key();
        let count = PropertyDecl::new("count", CimType::Uint32).with_default(0u32);
        let def = ClassDefinition::new("root/test", "Foo");
        let def = if id_first {
            def.with_property(id).with_property(count)
        } else {
            def.with_property(count).with_property(id)
        };
        ScmoClass::build(&def).unwrap()
    }

    fn host_class() -> ScmoClass {
        ScmoClass::build(
            &ClassDefinition::new("root/test", "Host")
                .with_property(PropertyDecl::new("Name", CimType::String).key())
                .with_property(PropertyDecl::new("Port", CimType::Uint16).key())
                .with_property(PropertyDecl::new("Secure", CimType::Boolean).key())
                .with_property(PropertyDecl::new("Parent", CimType::Reference).key())
                .with_property(PropertyDecl::new("Label", CimType::String).with_default("none"))
                .with_property(PropertyDecl::array("Parts", CimType::Instance))
                .with_property(PropertyDecl::new("Payload", CimType::Object)),
        )
        .unwrap()
    }

    fn part_class() -> ScmoClass {
        ScmoClass::build(
            &ClassDefinition::new("root/test", "Part")
                .with_property(PropertyDecl::new("Serial", CimType::Uint32).key()),
        )
        .unwrap()
    }

    fn part(class: &ScmoClass, serial: u32) -> ScmoInstance {
        let mut p = ScmoInstance::new(class).unwrap();
        p.set_key_binding("Serial", Scalar::Uint32(serial)).unwrap();
        p
    }

    #[test]
    fn foo_scenario() {
        for id_first in [true, false] {
            let class = foo(id_first);
            let instance = ScmoInstance::bind(
                &class,
                [("id", CimValue::from("abc"))],
                Vec::<(&str, Scalar)>::new(),
                &EngineConfig::default(),
            )
            .unwrap();

            let count = instance.property("count").unwrap();
            assert_eq!(count.uint().unwrap(), 0);
            assert!(!count.is_set);

            let id = instance.key_binding("id").unwrap();
            assert_eq!(id.value, Scalar::String("abc".into()));
            assert_eq!(instance.to_canonical_path(), r#"Foo.id="abc""#);
        }
    }

    #[test]
    fn default_fallback_until_written() {
        let class = host_class();
        let mut instance = ScmoInstance::new(&class).unwrap();
        let label = instance.property("label").unwrap();
        assert_eq!(label.string().unwrap(), "none");
        assert!(!label.is_set);

        instance.set_property("Label", "set".into()).unwrap();
        let label = instance.property("Label").unwrap();
        assert_eq!(label.string().unwrap(), "set");
        assert!(label.is_set);

        let payload = instance.property("Payload").unwrap();
        assert!(payload.value.is_null());
        assert!(matches!(payload.scalar(), Err(ScmoError::NullValue { .. })));
    }

    #[test]
    fn key_order_does_not_change_the_path() {
        let class = host_class();
        let parts = part_class();
        let parent = part(&parts, 7);
        let config = EngineConfig::default();

        let a = ScmoInstance::bind(
            &class,
            Vec::<(&str, CimValue)>::new(),
            vec![
                ("Name", Scalar::from("srv")),
                ("Port", Scalar::Uint64(8080)),
                ("Secure", Scalar::Boolean(true)),
                ("Parent", Scalar::Reference(parent.clone())),
            ],
            &config,
        )
        .unwrap();
        let b = ScmoInstance::bind(
            &class,
            Vec::<(&str, CimValue)>::new(),
            vec![
                ("parent", Scalar::Reference(parent.clone())),
                ("SECURE", Scalar::Boolean(true)),
                ("port", Scalar::Uint16(8080)),
                ("name", Scalar::from("srv")),
            ],
            &config,
        )
        .unwrap();

        assert_eq!(a.to_canonical_path(), b.to_canonical_path());
        assert_eq!(a.object_path(), b.object_path());
        assert_eq!(
            a.to_canonical_path(),
            r#"Host.Name="srv",Parent="root/test:Part.Serial=7",Port=8080,Secure=TRUE"#
        );
    }

    #[test]
    fn key_binding_tolerance_and_errors() {
        let class = host_class();
        let mut instance = ScmoInstance::new(&class).unwrap();

        instance.set_key_binding("Port", Scalar::Uint64(443)).unwrap();
        assert_eq!(instance.key_binding("port").unwrap().value, Scalar::Uint16(443));

        assert!(matches!(
            instance.set_key_binding("Port", Scalar::Uint64(70000)),
            Err(ScmoError::InvalidParameter { .. })
        ));
        assert!(matches!(
            instance.set_key_binding("Port", Scalar::from("x")),
            Err(ScmoError::TypeMismatch { .. })
        ));
        assert!(matches!(
            instance.set_key_binding("Nope", Scalar::Boolean(true)),
            Err(ScmoError::NotFound { .. })
        ));
        assert!(matches!(
            instance.key_binding("Name"),
            Err(ScmoError::NullValue { .. })
        ));
        assert!(matches!(
            instance.key_binding_at(9),
            Err(ScmoError::IndexOutOfBound { .. })
        ));

        instance
            .set_key_binding_from_str("Secure", KeyBindingType::Boolean, "false")
            .unwrap();
        assert_eq!(instance.key_binding("Secure").unwrap().value, Scalar::Boolean(false));
        assert!(matches!(
            instance.set_key_binding_from_str("Secure", KeyBindingType::Numeric, "1"),
            Err(ScmoError::TypeMismatch { .. })
        ));

        instance.clear_key_bindings();
        assert!(matches!(
            instance.key_binding("Port"),
            Err(ScmoError::NullValue { .. })
        ));
    }

    #[test]
    fn type_checks_on_write() {
        let class = host_class();
        let parts = part_class();
        let mut instance = ScmoInstance::new(&class).unwrap();

        assert!(matches!(
            instance.set_property("Label", 5u32.into()),
            Err(ScmoError::TypeMismatch { .. })
        ));
        assert!(matches!(
            instance.set_property("Label", CimValue::array(CimType::String, vec![])),
            Err(ScmoError::NotAnArray { .. })
        ));
        assert!(matches!(
            instance.set_property("Parts", CimValue::null(CimType::Instance)),
            Err(ScmoError::IsAnArray { .. })
        ));
        assert!(matches!(
            instance.set_property_at(99, true.into()),
            Err(ScmoError::IndexOutOfBound { .. })
        ));
        assert!(matches!(
            instance.set_property_with_origin("Label", "x".into(), Some("Other")),
            Err(ScmoError::NotSameOrigin { .. })
        ));
        instance
            .set_property_with_origin("Label", "x".into(), Some("host"))
            .unwrap();

        // an instance is accepted for an object property
        let p = part(&parts, 1);
        instance
            .set_property("Payload", Scalar::Instance(p.clone()).into())
            .unwrap();
        let payload = instance.property("Payload").unwrap();
        assert_eq!(payload.scalar().unwrap(), &Scalar::Object(p));
    }

    #[test]
    fn unmatched_policy() {
        let class = foo(true);
        let props = || [("id", CimValue::from("a")), ("extra", CimValue::from(1u8))];

        let err = ScmoInstance::bind(&class, props(), Vec::<(&str, Scalar)>::new(), &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err, ScmoError::NotFound { name: "extra".into() });

        let config = EngineConfig {
            unmatched_property_policy: UnmatchedPolicy::Drop,
            ..EngineConfig::default()
        };
        let instance = ScmoInstance::bind(&class, props(), Vec::<(&str, Scalar)>::new(), &config).unwrap();
        assert_eq!(instance.property_count(), 2);
        assert!(instance.property("extra").is_err());
    }

    #[test]
    fn user_defined_properties_without_class() {
        let mut instance =
            ScmoInstance::without_class("root/x", "Unknown", &EngineConfig::default()).unwrap();
        assert!(instance.no_class_for_instance());

        instance.set_property("b", "first".into()).unwrap();
        instance
            .set_property_with_origin("a", 3u32.into(), Some("Base"))
            .unwrap();
        instance.set_property("B", "second".into()).unwrap();

        assert_eq!(instance.property_count(), 2);
        assert_eq!(instance.property_at(0).unwrap().name, "b");
        assert_eq!(instance.property_at(0).unwrap().string().unwrap(), "second");
        assert_eq!(instance.property_at(1).unwrap().uint().unwrap(), 3);
        assert_eq!(instance.property_index("A").unwrap(), 1);
        assert_eq!(instance.property_origin("a").unwrap().as_deref(), Some("Base"));

        assert!(matches!(
            instance.set_property("b", 1u8.into()),
            Err(ScmoError::TypeMismatch { .. })
        ));
        assert!(matches!(
            instance.set_property_with_origin("a", 4u32.into(), Some("Other")),
            Err(ScmoError::NotSameOrigin { .. })
        ));

        instance
            .set_key_binding_from_str("Id", KeyBindingType::Numeric, "-12")
            .unwrap();
        instance.set_key_binding("Name", Scalar::from("n")).unwrap();
        assert_eq!(instance.key_binding_count(), 2);
        assert_eq!(instance.key_binding("id").unwrap().value, Scalar::Sint64(-12));
        assert_eq!(instance.to_canonical_path(), r#"Unknown.Id=-12,Name="n""#);
    }

    #[test]
    fn class_refcount_returns_to_baseline() {
        let class = host_class();
        let baseline = class.ref_count();
        let instances: Vec<ScmoInstance> =
            (0..16).map(|_| ScmoInstance::new(&class).unwrap()).collect();
        assert_eq!(class.ref_count(), baseline + 16);
        drop(instances);
        assert_eq!(class.ref_count(), baseline);
    }

    #[test]
    fn dropping_releases_each_embedded_instance_once() {
        let class = host_class();
        let parts = part_class();
        let subs: Vec<ScmoInstance> = (0..3).map(|i| part(&parts, i)).collect();
        let before: Vec<usize> = subs.iter().map(ScmoInstance::ref_count).collect();

        let mut owner = ScmoInstance::new(&class).unwrap();
        owner
            .set_property(
                "Parts",
                CimValue::array(
                    CimType::Instance,
                    vec![Scalar::Instance(subs[0].clone()), Scalar::Instance(subs[1].clone())],
                ),
            )
            .unwrap();
        owner
            .set_property("Payload", Scalar::Instance(subs[2].clone()).into())
            .unwrap();
        assert_eq!(owner.external_reference_count(), 3);
        for (s, b) in subs.iter().zip(&before) {
            assert_eq!(s.ref_count(), b + 1);
        }

        drop(owner);
        for (s, b) in subs.iter().zip(&before) {
            assert_eq!(s.ref_count(), *b);
        }
    }

    #[test]
    fn deep_release_is_idempotent() {
        let class = host_class();
        let parts = part_class();
        let sub = part(&parts, 1);
        let mut owner = ScmoInstance::new(&class).unwrap();
        owner
            .set_property("Payload", Scalar::Instance(sub.clone()).into())
            .unwrap();
        assert_eq!(sub.ref_count(), 2);
        assert!(owner.external_reference(0).unwrap().is_same(&sub));

        owner.release_external_references();
        assert_eq!(sub.ref_count(), 1);
        assert_eq!(owner.external_reference_count(), 0);
        owner.release_external_references();
        drop(owner);
        assert_eq!(sub.ref_count(), 1);
    }

    #[test]
    fn copy_on_write() {
        let class = host_class();
        let parts = part_class();
        let sub = part(&parts, 1);
        let mut a = ScmoInstance::new(&class).unwrap();
        a.set_property("Payload", Scalar::Instance(sub.clone()).into())
            .unwrap();

        let mut b = a.clone();
        assert!(b.is_same(&a));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(sub.ref_count(), 2);

        b.set_property("Label", "changed".into()).unwrap();
        assert!(!b.is_same(&a));
        assert_eq!(a.ref_count(), 1);
        assert_eq!(sub.ref_count(), 3);
        assert!(!a.property("Label").unwrap().is_set);
        assert_eq!(b.property("Label").unwrap().string().unwrap(), "changed");
        assert_eq!(class.ref_count(), 3);
    }

    #[test]
    fn header_overrides_and_path_only_clone() {
        let class = host_class();
        let mut instance = ScmoInstance::new(&class).unwrap();
        instance.set_key_binding("Name", Scalar::from("srv")).unwrap();
        instance.set_property("Label", "big".into()).unwrap();
        instance.set_host_name("example.org").unwrap();
        assert!(!instance.is_compromised());
        instance.set_namespace("root/other").unwrap();
        assert!(instance.is_compromised());
        instance.set_export_set_only(true);
        assert!(instance.export_set_only());

        assert_eq!(
            instance.object_path().to_string(),
            r#"//example.org/root/other:Host.Name="srv""#
        );

        let path = instance.clone_path_only().unwrap();
        assert_eq!(path.object_path(), instance.object_path());
        assert!(!path.property("Label").unwrap().is_set);
        assert!(path.class().is_same(&class));
    }

    #[test]
    fn relocation_keeps_every_value() {
        let config = EngineConfig {
            initial_chunk_size: 0,
            ..EngineConfig::default()
        };
        let class = host_class();
        let mut instance = ScmoInstance::with_config(&class, &config).unwrap();
        instance.set_property("Label", "first".into()).unwrap();
        let before = instance.chunk().total_size();
        let long = "x".repeat(before * 4);
        instance.set_host_name(&long).unwrap();
        assert!(instance.chunk().total_size() > before);
        assert_eq!(instance.property("Label").unwrap().string().unwrap(), "first");
        assert_eq!(instance.host_name(), Some(long.as_str()));
    }
}
