use std::fmt::{self, Display};

use crate::error::{Result, ScmoError};

/// CIM type tags. The discriminant is what the layout stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CimType {
    Boolean = 0,
    Uint8,
    Sint8,
    Uint16,
    Sint16,
    Uint32,
    Sint32,
    Uint64,
    Sint64,
    Real32,
    Real64,
    Char16,
    String,
    DateTime,
    Reference,
    Object,
    Instance,
}

impl CimType {
    pub const ALL: [CimType; 17] = [
        CimType::Boolean,
        CimType::Uint8,
        CimType::Sint8,
        CimType::Uint16,
        CimType::Sint16,
        CimType::Uint32,
        CimType::Sint32,
        CimType::Uint64,
        CimType::Sint64,
        CimType::Real32,
        CimType::Real64,
        CimType::Char16,
        CimType::String,
        CimType::DateTime,
        CimType::Reference,
        CimType::Object,
        CimType::Instance,
    ];

    pub fn from_u32(tag: u32) -> Option<CimType> {
        Self::ALL.get(tag as usize).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            CimType::Boolean => "boolean",
            CimType::Uint8 => "uint8",
            CimType::Sint8 => "sint8",
            CimType::Uint16 => "uint16",
            CimType::Sint16 => "sint16",
            CimType::Uint32 => "uint32",
            CimType::Sint32 => "sint32",
            CimType::Uint64 => "uint64",
            CimType::Sint64 => "sint64",
            CimType::Real32 => "real32",
            CimType::Real64 => "real64",
            CimType::Char16 => "char16",
            CimType::String => "string",
            CimType::DateTime => "datetime",
            CimType::Reference => "reference",
            CimType::Object => "object",
            CimType::Instance => "instance",
        }
    }

    pub fn from_name(name: &str) -> Option<CimType> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name))
    }

    /// Values of these types live in sub-instances outside the chunk.
    pub fn is_external(&self) -> bool {
        matches!(self, CimType::Reference | CimType::Object | CimType::Instance)
    }

    /// Values of these types are stored out of line as strings.
    pub fn is_string_like(&self) -> bool {
        matches!(self, CimType::String | CimType::DateTime)
    }

    /// Maps a key property type to the kind of key binding it produces.
    /// Objects and instances cannot be keys.
    pub fn key_binding_type(&self) -> Option<KeyBindingType> {
        match self {
            CimType::Boolean => Some(KeyBindingType::Boolean),
            CimType::Char16 | CimType::String | CimType::DateTime => Some(KeyBindingType::String),
            CimType::Reference => Some(KeyBindingType::Reference),
            CimType::Object | CimType::Instance => None,
            _ => Some(KeyBindingType::Numeric),
        }
    }
}

impl Display for CimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyBindingType {
    Boolean,
    String,
    Numeric,
    Reference,
}

impl KeyBindingType {
    /// The CIM type used for a user-defined key binding of this kind.
    pub fn default_cim_type(&self, text: &str) -> CimType {
        match self {
            KeyBindingType::Boolean => CimType::Boolean,
            KeyBindingType::String => CimType::String,
            KeyBindingType::Reference => CimType::Reference,
            KeyBindingType::Numeric => {
                if text.parse::<u64>().is_ok() {
                    CimType::Uint64
                } else if text.parse::<i64>().is_ok() {
                    CimType::Sint64
                } else {
                    CimType::Real64
                }
            }
        }
    }
}

/// A CIM datetime: `yyyymmddhhmmss.mmmmmmsutc` for timestamps or
/// `ddddddddhhmmss.mmmmmm:000` for intervals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CimDateTime(String);

impl CimDateTime {
    pub const LEN: usize = 25;

    pub fn parse(s: &str) -> Result<CimDateTime> {
        let b = s.as_bytes();
        let invalid = || ScmoError::invalid_parameter(s, "not a CIM datetime");
        if b.len() != Self::LEN || b[14] != b'.' {
            return Err(invalid());
        }
        let digit_or_wild = |c: u8| c.is_ascii_digit() || c == b'*';
        if !b[..14].iter().all(|&c| digit_or_wild(c)) || !b[15..21].iter().all(|&c| digit_or_wild(c)) {
            return Err(invalid());
        }
        match b[21] {
            b'+' | b'-' => {
                if !b[22..].iter().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
            }
            b':' => {
                if &b[22..] != b"000" {
                    return Err(invalid());
                }
            }
            _ => return Err(invalid()),
        }
        Ok(CimDateTime(s.to_string()))
    }

    /// Wraps a string read back from a chunk, which was validated on write.
    pub(crate) fn from_stored(s: &str) -> CimDateTime {
        CimDateTime(s.to_string())
    }

    pub fn is_interval(&self) -> bool {
        self.0.as_bytes().get(21) == Some(&b':')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CimDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
