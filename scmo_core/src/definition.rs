use crate::qualifier::QualifierDecl;
use crate::types::CimType;
use crate::value::CimValue;

/// Class metadata as supplied by a class provider, before it is laid out in
/// a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDefinition {
    pub namespace: String,
    pub class_name: String,
    pub super_class_name: Option<String>,
    pub properties: Vec<PropertyDecl>,
    pub qualifiers: Vec<QualifierDecl>,
}

impl ClassDefinition {
    pub fn new(namespace: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            class_name: class_name.into(),
            super_class_name: None,
            properties: Vec::new(),
            qualifiers: Vec::new(),
        }
    }

    pub fn with_super_class(mut self, name: impl Into<String>) -> Self {
        self.super_class_name = Some(name.into());
        self
    }

    pub fn with_property(mut self, property: PropertyDecl) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_qualifier(mut self, qualifier: QualifierDecl) -> Self {
        self.qualifiers.push(qualifier);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub name: String,
    pub cim_type: CimType,
    pub is_array: bool,
    /// `None` means a null default.
    pub default: Option<CimValue>,
    /// Defaults to the class being built.
    pub class_origin: Option<String>,
    pub reference_class: Option<String>,
    pub propagated: bool,
    pub qualifiers: Vec<QualifierDecl>,
}

impl PropertyDecl {
    pub fn new(name: impl Into<String>, cim_type: CimType) -> Self {
        Self {
            name: name.into(),
            cim_type,
            is_array: false,
            default: None,
            class_origin: None,
            reference_class: None,
            propagated: false,
            qualifiers: Vec::new(),
        }
    }

    pub fn array(name: impl Into<String>, cim_type: CimType) -> Self {
        Self {
            is_array: true,
            ..Self::new(name, cim_type)
        }
    }

    pub fn with_default(mut self, value: impl Into<CimValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Adds a `Key` qualifier.
    pub fn key(mut self) -> Self {
        self.qualifiers.push(QualifierDecl::key());
        self
    }

    pub fn with_qualifier(mut self, qualifier: QualifierDecl) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn with_origin(mut self, class_name: impl Into<String>) -> Self {
        self.class_origin = Some(class_name.into());
        self
    }

    pub fn with_reference_class(mut self, class_name: impl Into<String>) -> Self {
        self.reference_class = Some(class_name.into());
        self
    }

    pub fn propagated(mut self) -> Self {
        self.propagated = true;
        self
    }

    pub fn is_key(&self) -> bool {
        self.qualifiers.iter().any(QualifierDecl::marks_key)
    }

    /// The default value, or a typed null when none was given.
    pub fn default_value(&self) -> CimValue {
        self.default.clone().unwrap_or(CimValue::Null {
            cim_type: self.cim_type,
            is_array: self.is_array,
        })
    }
}
