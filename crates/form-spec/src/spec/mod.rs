pub mod field;
pub mod form;
pub mod page;
pub mod validation;

pub use field::{Choice, Constraint, DEFAULT_TAB, FieldSpec, FieldType};
pub use form::{FormSpec, LayoutMode, SpecError};
pub use page::{PageSpec, TabSpec};
pub use validation::CrossFieldValidation;
