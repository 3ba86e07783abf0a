pub mod cache;
pub mod class;
pub mod config;
pub mod definition;
pub mod dump;
pub mod error;
pub mod instance;
pub mod memory;
pub mod ordered_set;
pub mod path;
pub mod qualifier;
pub mod streamer;
pub mod types;
pub mod value;

mod cell;

pub use cache::{ClassCache, ClassProvider, MemoryClassProvider};
pub use class::{ClassKeyBinding, ClassProperty, ScmoClass};
pub use config::{EngineConfig, UnmatchedPolicy};
pub use definition::{ClassDefinition, PropertyDecl};
pub use error::{ErrorCode, Result, ScmoError, ScmoRc};
pub use instance::{KeyBindingValue, PropertyValue, ScmoInstance};
pub use path::{ObjectPath, PathKeyBinding};
pub use qualifier::{QualifierDecl, QualifierName};
pub use types::{CimDateTime, CimType, KeyBindingType};
pub use value::{CimValue, Scalar};
