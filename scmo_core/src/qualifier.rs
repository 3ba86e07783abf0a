// CIM qualifiers as stored in a class chunk.

use crate::cell::{read_cell, write_cell};
use crate::error::Result;
use crate::memory::layout::*;
use crate::memory::Chunk;
use crate::value::{CimValue, Scalar};

macro_rules! qualifier_names {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// The DMTF standard qualifier names. Anything else is stored as
        /// `UserDefined` plus the name string.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum QualifierName {
            UserDefined = 0,
            $($variant),*
        }

        impl QualifierName {
            const KNOWN: &'static [QualifierName] = &[$(QualifierName::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    QualifierName::UserDefined => "",
                    $(QualifierName::$variant => $name),*
                }
            }
        }
    };
}

qualifier_names! {
    Abstract => "Abstract",
    Aggregate => "Aggregate",
    Aggregation => "Aggregation",
    Alias => "Alias",
    ArrayType => "ArrayType",
    Association => "Association",
    BitMap => "BitMap",
    BitValues => "BitValues",
    ClassConstraint => "ClassConstraint",
    Composition => "Composition",
    Correlatable => "Correlatable",
    Counter => "Counter",
    Delete => "Delete",
    Deprecated => "Deprecated",
    Description => "Description",
    DisplayDescription => "DisplayDescription",
    DisplayName => "DisplayName",
    Dn => "DN",
    EmbeddedInstance => "EmbeddedInstance",
    EmbeddedObject => "EmbeddedObject",
    Exception => "Exception",
    Expensive => "Expensive",
    Experimental => "Experimental",
    Gauge => "Gauge",
    IfDeleted => "IfDeleted",
    In => "In",
    Indication => "Indication",
    Invisible => "Invisible",
    IsPUnit => "IsPUnit",
    Key => "Key",
    Large => "Large",
    MappingStrings => "MappingStrings",
    Max => "Max",
    MaxLen => "MaxLen",
    MaxValue => "MaxValue",
    MethodConstraint => "MethodConstraint",
    Min => "Min",
    MinLen => "MinLen",
    MinValue => "MinValue",
    ModelCorrespondence => "ModelCorrespondence",
    Nonlocal => "Nonlocal",
    NonlocalType => "NonlocalType",
    NullValue => "NullValue",
    OctetString => "OctetString",
    Out => "Out",
    Override => "Override",
    Propagated => "Propagated",
    PropertyConstraint => "PropertyConstraint",
    PropertyUsage => "PropertyUsage",
    Provider => "Provider",
    PUnit => "PUnit",
    Read => "Read",
    Required => "Required",
    Revision => "Revision",
    Schema => "Schema",
    Source => "Source",
    SourceType => "SourceType",
    Static => "Static",
    Syntax => "Syntax",
    SyntaxType => "SyntaxType",
    Terminal => "Terminal",
    TriggerType => "TriggerType",
    UMLPackagePath => "UMLPackagePath",
    Units => "Units",
    UnknownValues => "UnknownValues",
    UnsupportedValues => "UnsupportedValues",
    ValueMap => "ValueMap",
    Values => "Values",
    Version => "Version",
    Weak => "Weak",
    Write => "Write",
}

impl QualifierName {
    pub fn from_name(name: &str) -> QualifierName {
        Self::KNOWN
            .iter()
            .copied()
            .find(|q| q.as_str().len() == name.len() && q.as_str().eq_ignore_ascii_case(name))
            .unwrap_or(QualifierName::UserDefined)
    }

    pub fn from_u32(tag: u32) -> Option<QualifierName> {
        match tag {
            0 => Some(QualifierName::UserDefined),
            n => Self::KNOWN.get(n as usize - 1).copied(),
        }
    }
}

/// Flavor bits carried by a qualifier.
pub mod flavor {
    pub const OVERRIDABLE: u32 = 1;
    pub const TOSUBCLASS: u32 = 1 << 1;
    pub const TOINSTANCE: u32 = 1 << 2;
    pub const TRANSLATABLE: u32 = 1 << 3;
    pub const DISABLEOVERRIDE: u32 = 1 << 4;
    pub const RESTRICTED: u32 = 1 << 5;

    pub const DEFAULTS: u32 = OVERRIDABLE | TOSUBCLASS;
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualifierDecl {
    pub name: String,
    pub value: CimValue,
    pub flavor: u32,
    pub propagated: bool,
}

impl QualifierDecl {
    pub fn new(name: impl Into<String>, value: impl Into<CimValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            flavor: flavor::DEFAULTS,
            propagated: false,
        }
    }

    pub fn key() -> Self {
        Self::new("Key", true)
    }

    pub fn with_flavor(mut self, flavor: u32) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn propagated(mut self) -> Self {
        self.propagated = true;
        self
    }

    /// A `Key` qualifier set to true.
    pub fn marks_key(&self) -> bool {
        QualifierName::from_name(&self.name) == QualifierName::Key
            && matches!(self.value, CimValue::Scalar(Scalar::Boolean(true)))
    }
}

/// Writes `qualifiers` as a contiguous array and records count and pointer.
pub(crate) fn write_qualifiers(
    chunk: &mut Chunk,
    count_at: usize,
    array_at: usize,
    qualifiers: &[QualifierDecl],
) -> Result<()> {
    chunk.write_u32(count_at, qualifiers.len() as u32);
    let array = chunk.alloc(qualifiers.len() * QUAL_SIZE)?;
    chunk.write_ptr(array_at, array);
    for (i, q) in qualifiers.iter().enumerate() {
        q.value.validate(&q.name)?;
        let at = array.start as usize + i * QUAL_SIZE;
        let name = QualifierName::from_name(&q.name);
        chunk.write_u32(at + QUAL_PROPAGATED, q.propagated as u32);
        chunk.write_u32(at + QUAL_NAME, name as u32);
        chunk.write_u32(at + QUAL_FLAVOR, q.flavor);
        if name == QualifierName::UserDefined {
            chunk.set_str(at + QUAL_USER_NAME, &q.name)?;
        }
        write_cell(chunk, at + QUAL_VALUE, &q.value, false)?;
    }
    Ok(())
}

pub(crate) fn read_qualifiers(
    chunk: &Chunk,
    count_at: usize,
    array_at: usize,
) -> Result<Vec<QualifierDecl>> {
    let count = chunk.read_u32(count_at) as usize;
    let array = chunk.read_ptr(array_at);
    if count > 0 {
        chunk.check_ptr(array, count * QUAL_SIZE)?;
    }
    (0..count)
        .map(|i| {
            let at = array.start as usize + i * QUAL_SIZE;
            let name = match QualifierName::from_u32(chunk.read_u32(at + QUAL_NAME)) {
                Some(QualifierName::UserDefined) | None => {
                    chunk.str_field(at + QUAL_USER_NAME).unwrap_or("").to_string()
                }
                Some(known) => known.as_str().to_string(),
            };
            Ok(QualifierDecl {
                name,
                value: read_cell(chunk, at + QUAL_VALUE)?,
                flavor: chunk.read_u32(at + QUAL_FLAVOR),
                propagated: chunk.read_u32(at + QUAL_PROPAGATED) != 0,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CimType;

    #[test]
    fn names_intern_case_insensitively() {
        assert_eq!(QualifierName::KNOWN.len(), 71);
        assert_eq!(QualifierName::from_name("key"), QualifierName::Key);
        assert_eq!(QualifierName::from_name("VALUEMAP"), QualifierName::ValueMap);
        assert_eq!(QualifierName::from_name("dn"), QualifierName::Dn);
        assert_eq!(QualifierName::from_name("Vendor_X"), QualifierName::UserDefined);
        assert_eq!(QualifierName::from_u32(QualifierName::Write as u32), Some(QualifierName::Write));
        assert_eq!(QualifierName::from_u32(72), None);
    }

    #[test]
    fn key_detection() {
        assert!(QualifierDecl::key().marks_key());
        assert!(QualifierDecl::new("KEY", true).marks_key());
        assert!(!QualifierDecl::new("Key", CimValue::null(CimType::Boolean)).marks_key());
        assert!(!QualifierDecl::new("Key", false).marks_key());
        assert!(!QualifierDecl::new("Description", true).marks_key());
    }

    #[test]
    fn qualifier_array_round_trip() {
        let mut chunk = Chunk::new(CLASS_MAGIC, CLASS_MAIN_SIZE, 1024, 8);
        let quals = vec![
            QualifierDecl::new("Description", "a thing").propagated(),
            QualifierDecl::new("Vendor_Flag", 3u32).with_flavor(flavor::RESTRICTED),
            QualifierDecl::new(
                "ValueMap",
                CimValue::array(CimType::String, vec!["1".into(), "2".into()]),
            ),
        ];
        write_qualifiers(&mut chunk, CLS_QUALIFIER_COUNT, CLS_QUALIFIER_ARRAY, &quals).unwrap();
        let back = read_qualifiers(&chunk, CLS_QUALIFIER_COUNT, CLS_QUALIFIER_ARRAY).unwrap();
        assert_eq!(back, quals);
    }
}
