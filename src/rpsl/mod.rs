//! The RPSL object model: parsing, class schemas and validation.

pub mod fields;
mod object;
mod parser;
mod schema;
mod validator;

pub use self::fields::{AsNumber, InvalidValue, IpVersion, Prefix, SourceName};
pub use self::object::{Attribute, ObjectKey, RpslObject};
pub use self::parser::{ParseError, parse, split_objects};
pub use self::schema::{AttributeSpec, ClassSchema, ObjectClass, Syntax};
pub use self::validator::{
    ObjectLookup, ReferenceMode, ValidationError, ValidationErrors, ValidationReport, validate, validate_deletion,
};
