// scmo_core/src/memory/layout.rs
//
// Byte layout of class and instance chunks. All integers are little endian,
// every structure starts on an 8 byte boundary and every offset below is
// relative to the start of the structure it belongs to.

pub const FORMAT_VERSION: u32 = 1;

pub const CLASS_MAGIC: u32 = 0xF00F_ABCD;
pub const INSTANCE_MAGIC: u32 = 0xD00D_1234;

pub const PROPERTY_HASH_SIZE: usize = 64;
pub const KEY_BINDING_HASH_SIZE: usize = 32;

pub const ALIGN: usize = 8;

pub const fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

// === Relative pointer ===
// start u64, size u32, 4 bytes padding
pub const PTR_START: usize = 0;
pub const PTR_SIZE_FIELD: usize = 8;
pub const PTR_SIZE: usize = 16;

// === Management header ===
pub const HDR_MAGIC: usize = 0;
pub const HDR_TOTAL_SIZE: usize = 8;
pub const HDR_FREE_BYTES: usize = 16;
pub const HDR_START_OF_FREE: usize = 24;
pub const HDR_NUMBER_EXT_REF: usize = 32;
pub const HDR_SIZE_EXT_REF_INDEX: usize = 36;
pub const HDR_EXT_REF_INDEX: usize = 40;
pub const HEADER_SIZE: usize = HDR_EXT_REF_INDEX + PTR_SIZE;

// === Value union ===
// Either the raw bits of a fixed-width scalar, a relative pointer to string
// or array data, or the slot of an external reference.
pub const UNION_SIZE: usize = 16;

// === Value cell ===
pub const CELL_TYPE: usize = 0;
pub const CELL_FLAGS: usize = 4;
pub const CELL_ARRAY_SIZE: usize = 8;
pub const CELL_UNION: usize = 16;
pub const CELL_SIZE: usize = CELL_UNION + UNION_SIZE;

pub const CELL_FLAG_NULL: u32 = 1;
pub const CELL_FLAG_ARRAY: u32 = 1 << 1;
pub const CELL_FLAG_SET: u32 = 1 << 2;

// === Hash-indexed set header ===
// number u32 + padding, hash table of u32 node index + 1, node array pointer
pub const SET_NUMBER: usize = 0;
pub const SET_HASH_TABLE: usize = 8;

pub const fn set_node_array(hash_size: usize) -> usize {
    SET_HASH_TABLE + hash_size * 4
}

pub const fn set_header_size(hash_size: usize) -> usize {
    set_node_array(hash_size) + PTR_SIZE
}

// Shared prefix of property and key binding nodes.
pub const NODE_HAS_NEXT: usize = 0;
pub const NODE_NEXT: usize = 4;
pub const NODE_NAME: usize = 8;
pub const NODE_TAG: usize = 24;

// === Property node ===
pub const PROP_FLAGS: usize = 28;
pub const PROP_ORIGIN: usize = 32;
pub const PROP_REF_CLASS: usize = 48;
pub const PROP_DEFAULT: usize = 64;
pub const PROP_QUALIFIER_COUNT: usize = PROP_DEFAULT + CELL_SIZE;
pub const PROP_QUALIFIER_ARRAY: usize = PROP_QUALIFIER_COUNT + 8;
pub const PROP_NODE_SIZE: usize = PROP_QUALIFIER_ARRAY + PTR_SIZE;

pub const PROP_FLAG_PROPAGATED: u32 = 1;
pub const PROP_FLAG_KEY: u32 = 1 << 1;

// === Key binding node ===
pub const KEY_TYPE: usize = 28;
pub const KEY_NODE_SIZE: usize = 32;

// === Qualifier ===
pub const QUAL_PROPAGATED: usize = 0;
pub const QUAL_NAME: usize = 4;
pub const QUAL_FLAVOR: usize = 8;
pub const QUAL_USER_NAME: usize = 16;
pub const QUAL_VALUE: usize = 32;
pub const QUAL_SIZE: usize = QUAL_VALUE + CELL_SIZE;

// === Class main structure ===
pub const CLS_FLAGS: usize = HEADER_SIZE;
pub const CLS_SUPER_CLASS: usize = CLS_FLAGS + 8;
pub const CLS_CLASS_NAME: usize = CLS_SUPER_CLASS + PTR_SIZE;
pub const CLS_NAMESPACE: usize = CLS_CLASS_NAME + PTR_SIZE;
pub const CLS_KEY_MASK: usize = CLS_NAMESPACE + PTR_SIZE;
pub const CLS_KEY_INDEX_LIST: usize = CLS_KEY_MASK + PTR_SIZE;
pub const CLS_KEY_SET: usize = CLS_KEY_INDEX_LIST + PTR_SIZE;
pub const CLS_PROPERTY_SET: usize = CLS_KEY_SET + set_header_size(KEY_BINDING_HASH_SIZE);
pub const CLS_QUALIFIER_COUNT: usize = CLS_PROPERTY_SET + set_header_size(PROPERTY_HASH_SIZE);
pub const CLS_QUALIFIER_ARRAY: usize = CLS_QUALIFIER_COUNT + 8;
pub const CLASS_MAIN_SIZE: usize = CLS_QUALIFIER_ARRAY + PTR_SIZE;

pub const CLS_FLAG_EMPTY: u32 = 1;

// === Instance main structure ===
pub const INST_FLAGS: usize = HEADER_SIZE;
pub const INST_NUMBER_KEYS: usize = INST_FLAGS + 8;
pub const INST_NUMBER_USER_KEYS: usize = INST_NUMBER_KEYS + 4;
pub const INST_USER_KEY_ELEMENT: usize = INST_NUMBER_USER_KEYS + 4;
pub const INST_NAMESPACE: usize = INST_USER_KEY_ELEMENT + PTR_SIZE;
pub const INST_CLASS_NAME: usize = INST_NAMESPACE + PTR_SIZE;
pub const INST_HOST_NAME: usize = INST_CLASS_NAME + PTR_SIZE;
pub const INST_KEY_BINDING_ARRAY: usize = INST_HOST_NAME + PTR_SIZE;
pub const INST_NUMBER_PROPERTIES: usize = INST_KEY_BINDING_ARRAY + PTR_SIZE;
pub const INST_NUMBER_USER_PROPERTIES: usize = INST_NUMBER_PROPERTIES + 4;
pub const INST_PROPERTY_ARRAY: usize = INST_NUMBER_USER_PROPERTIES + 4;
pub const INST_USER_PROPERTY_ELEMENT: usize = INST_PROPERTY_ARRAY + PTR_SIZE;
pub const INSTANCE_MAIN_SIZE: usize = INST_USER_PROPERTY_ELEMENT + PTR_SIZE;

pub const INST_FLAG_INCLUDE_QUALIFIERS: u32 = 1;
pub const INST_FLAG_INCLUDE_CLASS_ORIGIN: u32 = 1 << 1;
pub const INST_FLAG_IS_CLASS_ONLY: u32 = 1 << 2;
pub const INST_FLAG_IS_COMPROMISED: u32 = 1 << 3;
pub const INST_FLAG_EXPORT_SET_ONLY: u32 = 1 << 4;
pub const INST_FLAG_NO_CLASS: u32 = 1 << 5;

// === Key binding value ===
pub const KBV_IS_SET: usize = 0;
pub const KBV_UNION: usize = 8;
pub const KBV_SIZE: usize = KBV_UNION + UNION_SIZE;

// === User-defined key binding element ===
pub const UKEY_NEXT: usize = 0;
pub const UKEY_TYPE: usize = PTR_SIZE;
pub const UKEY_NAME: usize = UKEY_TYPE + 8;
pub const UKEY_VALUE: usize = UKEY_NAME + PTR_SIZE;
pub const UKEY_SIZE: usize = UKEY_VALUE + KBV_SIZE;

// === User-defined property element ===
pub const UPROP_NEXT: usize = 0;
pub const UPROP_ORIGIN: usize = PTR_SIZE;
pub const UPROP_NAME: usize = UPROP_ORIGIN + PTR_SIZE;
pub const UPROP_VALUE: usize = UPROP_NAME + PTR_SIZE;
pub const UPROP_SIZE: usize = UPROP_VALUE + CELL_SIZE;
