use std::fmt::{self, Display};

use crate::error::{Result, ScmoError};
use crate::instance::ScmoInstance;
use crate::types::{CimDateTime, CimType};

/// A single CIM value of a known type.
#[derive(Debug, Clone)]
pub enum Scalar {
    Boolean(bool),
    Uint8(u8),
    Sint8(i8),
    Uint16(u16),
    Sint16(i16),
    Uint32(u32),
    Sint32(i32),
    Uint64(u64),
    Sint64(i64),
    Real32(f32),
    Real64(f64),
    Char16(u16),
    String(String),
    DateTime(CimDateTime),
    Reference(ScmoInstance),
    Object(ScmoInstance),
    Instance(ScmoInstance),
}

impl Scalar {
    pub fn cim_type(&self) -> CimType {
        match self {
            Scalar::Boolean(_) => CimType::Boolean,
            Scalar::Uint8(_) => CimType::Uint8,
            Scalar::Sint8(_) => CimType::Sint8,
            Scalar::Uint16(_) => CimType::Uint16,
            Scalar::Sint16(_) => CimType::Sint16,
            Scalar::Uint32(_) => CimType::Uint32,
            Scalar::Sint32(_) => CimType::Sint32,
            Scalar::Uint64(_) => CimType::Uint64,
            Scalar::Sint64(_) => CimType::Sint64,
            Scalar::Real32(_) => CimType::Real32,
            Scalar::Real64(_) => CimType::Real64,
            Scalar::Char16(_) => CimType::Char16,
            Scalar::String(_) => CimType::String,
            Scalar::DateTime(_) => CimType::DateTime,
            Scalar::Reference(_) => CimType::Reference,
            Scalar::Object(_) => CimType::Object,
            Scalar::Instance(_) => CimType::Instance,
        }
    }

    /// Raw little-endian bits of a fixed-width value, as stored inline.
    pub(crate) fn inline_bits(&self) -> Option<u64> {
        let bits = match self {
            Scalar::Boolean(v) => *v as u64,
            Scalar::Uint8(v) => *v as u64,
            Scalar::Sint8(v) => *v as u8 as u64,
            Scalar::Uint16(v) => *v as u64,
            Scalar::Sint16(v) => *v as u16 as u64,
            Scalar::Uint32(v) => *v as u64,
            Scalar::Sint32(v) => *v as u32 as u64,
            Scalar::Uint64(v) => *v,
            Scalar::Sint64(v) => *v as u64,
            Scalar::Real32(v) => v.to_bits() as u64,
            Scalar::Real64(v) => v.to_bits(),
            Scalar::Char16(v) => *v as u64,
            _ => return None,
        };
        Some(bits)
    }

    pub(crate) fn from_inline_bits(cim_type: CimType, bits: u64) -> Option<Scalar> {
        let value = match cim_type {
            CimType::Boolean => Scalar::Boolean(bits != 0),
            CimType::Uint8 => Scalar::Uint8(bits as u8),
            CimType::Sint8 => Scalar::Sint8(bits as u8 as i8),
            CimType::Uint16 => Scalar::Uint16(bits as u16),
            CimType::Sint16 => Scalar::Sint16(bits as u16 as i16),
            CimType::Uint32 => Scalar::Uint32(bits as u32),
            CimType::Sint32 => Scalar::Sint32(bits as u32 as i32),
            CimType::Uint64 => Scalar::Uint64(bits),
            CimType::Sint64 => Scalar::Sint64(bits as i64),
            CimType::Real32 => Scalar::Real32(f32::from_bits(bits as u32)),
            CimType::Real64 => Scalar::Real64(f64::from_bits(bits)),
            CimType::Char16 => Scalar::Char16(bits as u16),
            _ => return None,
        };
        Some(value)
    }

    pub(crate) fn instance(&self) -> Option<&ScmoInstance> {
        match self {
            Scalar::Reference(i) | Scalar::Object(i) | Scalar::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub(crate) fn with_external_type(instance: ScmoInstance, cim_type: CimType) -> Option<Scalar> {
        match cim_type {
            CimType::Reference => Some(Scalar::Reference(instance)),
            CimType::Object => Some(Scalar::Object(instance)),
            CimType::Instance => Some(Scalar::Instance(instance)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            Scalar::DateTime(d) => Some(d.as_str()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::Uint8(v) => Some(*v as u64),
            Scalar::Uint16(v) => Some(*v as u64),
            Scalar::Uint32(v) => Some(*v as u64),
            Scalar::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Sint8(v) => Some(*v as i64),
            Scalar::Sint16(v) => Some(*v as i64),
            Scalar::Sint32(v) => Some(*v as i64),
            Scalar::Sint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Real32(v) => Some(*v as f64),
            Scalar::Real64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::String(a), Scalar::String(b)) => a == b,
            (Scalar::DateTime(a), Scalar::DateTime(b)) => a == b,
            (Scalar::Reference(a), Scalar::Reference(b))
            | (Scalar::Object(a), Scalar::Object(b))
            | (Scalar::Instance(a), Scalar::Instance(b)) => a.is_same(b),
            _ => {
                self.cim_type() == other.cim_type() && self.inline_bits() == other.inline_bits()
            }
        }
    }
}

/// Formats the value the way it appears in a key binding.
impl Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Scalar::Uint8(v) => write!(f, "{}", v),
            Scalar::Sint8(v) => write!(f, "{}", v),
            Scalar::Uint16(v) => write!(f, "{}", v),
            Scalar::Sint16(v) => write!(f, "{}", v),
            Scalar::Uint32(v) => write!(f, "{}", v),
            Scalar::Sint32(v) => write!(f, "{}", v),
            Scalar::Uint64(v) => write!(f, "{}", v),
            Scalar::Sint64(v) => write!(f, "{}", v),
            Scalar::Real32(v) => write!(f, "{:?}", v),
            Scalar::Real64(v) => write!(f, "{:?}", v),
            Scalar::Char16(v) => match char::from_u32(*v as u32) {
                Some(c) => write!(f, "{}", c),
                None => write!(f, "\\x{:04X}", v),
            },
            Scalar::String(s) => write!(f, "{}", s),
            Scalar::DateTime(d) => write!(f, "{}", d),
            Scalar::Reference(i) => write!(f, "{}", i.object_path()),
            Scalar::Object(i) | Scalar::Instance(i) => write!(f, "instance of {}", i.class_name()),
        }
    }
}

/// A decoded value cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CimValue {
    Null { cim_type: CimType, is_array: bool },
    Scalar(Scalar),
    Array { cim_type: CimType, elements: Vec<Scalar> },
}

impl CimValue {
    pub fn null(cim_type: CimType) -> Self {
        CimValue::Null {
            cim_type,
            is_array: false,
        }
    }

    pub fn null_array(cim_type: CimType) -> Self {
        CimValue::Null {
            cim_type,
            is_array: true,
        }
    }

    pub fn array(cim_type: CimType, elements: Vec<Scalar>) -> Self {
        CimValue::Array { cim_type, elements }
    }

    pub fn cim_type(&self) -> CimType {
        match self {
            CimValue::Null { cim_type, .. } => *cim_type,
            CimValue::Scalar(s) => s.cim_type(),
            CimValue::Array { cim_type, .. } => *cim_type,
        }
    }

    pub fn is_array(&self) -> bool {
        match self {
            CimValue::Null { is_array, .. } => *is_array,
            CimValue::Scalar(_) => false,
            CimValue::Array { .. } => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CimValue::Null { .. })
    }

    /// Checks that every array element carries the array's type.
    pub fn validate(&self, name: &str) -> Result<()> {
        if let CimValue::Array { cim_type, elements } = self {
            if let Some(bad) = elements.iter().find(|e| e.cim_type() != *cim_type) {
                return Err(ScmoError::TypeMismatch {
                    name: name.to_string(),
                    declared: cim_type.to_string(),
                    supplied: bad.cim_type().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Same value re-tagged as `cim_type`. Only used to store an embedded
    /// instance under an object property.
    pub(crate) fn retagged(self, cim_type: CimType) -> CimValue {
        let retag = |s: Scalar| match (s.instance().cloned(), cim_type.is_external()) {
            (Some(i), true) => Scalar::with_external_type(i, cim_type).unwrap_or(s),
            _ => s,
        };
        match self {
            CimValue::Null { is_array, .. } => CimValue::Null { cim_type, is_array },
            CimValue::Scalar(s) => CimValue::Scalar(retag(s)),
            CimValue::Array { elements, .. } => CimValue::Array {
                cim_type,
                elements: elements.into_iter().map(retag).collect(),
            },
        }
    }

    // === Typed access ===

    pub fn scalar(&self, name: &str) -> Result<&Scalar> {
        match self {
            CimValue::Scalar(s) => Ok(s),
            CimValue::Null { .. } => Err(ScmoError::NullValue {
                name: name.to_string(),
            }),
            CimValue::Array { .. } => Err(ScmoError::IsAnArray {
                name: name.to_string(),
            }),
        }
    }

    pub fn elements(&self, name: &str) -> Result<&[Scalar]> {
        match self {
            CimValue::Array { elements, .. } => Ok(elements),
            CimValue::Null { .. } => Err(ScmoError::NullValue {
                name: name.to_string(),
            }),
            CimValue::Scalar(_) => Err(ScmoError::NotAnArray {
                name: name.to_string(),
            }),
        }
    }

    pub fn element(&self, name: &str, index: usize) -> Result<&Scalar> {
        let elements = self.elements(name)?;
        elements.get(index).ok_or(ScmoError::IndexOutOfBound {
            index,
            count: elements.len(),
        })
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        self.scalar(name)?.as_str().ok_or_else(|| wrong_type(name, "string"))
    }

    pub fn uint(&self, name: &str) -> Result<u64> {
        self.scalar(name)?.as_u64().ok_or_else(|| wrong_type(name, "unsigned integer"))
    }

    pub fn sint(&self, name: &str) -> Result<i64> {
        self.scalar(name)?.as_i64().ok_or_else(|| wrong_type(name, "signed integer"))
    }

    pub fn real(&self, name: &str) -> Result<f64> {
        self.scalar(name)?.as_f64().ok_or_else(|| wrong_type(name, "real"))
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        self.scalar(name)?.as_bool().ok_or_else(|| wrong_type(name, "boolean"))
    }
}

fn wrong_type(name: &str, expected: &str) -> ScmoError {
    ScmoError::WrongType {
        name: name.to_string(),
        expected: expected.to_string(),
    }
}

impl From<Scalar> for CimValue {
    fn from(s: Scalar) -> Self {
        CimValue::Scalar(s)
    }
}

macro_rules! scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Scalar {
                fn from(v: $t) -> Self {
                    Scalar::$variant(v)
                }
            }

            impl From<$t> for CimValue {
                fn from(v: $t) -> Self {
                    CimValue::Scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

scalar_from! {
    bool => Boolean,
    u8 => Uint8,
    i8 => Sint8,
    u16 => Uint16,
    i16 => Sint16,
    u32 => Uint32,
    i32 => Sint32,
    u64 => Uint64,
    i64 => Sint64,
    f32 => Real32,
    f64 => Real64,
    String => String,
    CimDateTime => DateTime,
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

impl From<&str> for CimValue {
    fn from(v: &str) -> Self {
        CimValue::Scalar(Scalar::String(v.to_string()))
    }
}
