#![allow(missing_docs)]

pub mod expr;
pub mod path;
pub mod render;
pub mod spec;
pub mod validate;
pub mod values;
pub mod visibility;

pub use expr::{Comparison, Expr, Operand};
pub use path::{FieldPath, PathError, Segment};
pub use render::{
    FillProgress, RenderField, RenderPayload, ScreenStatus, render_card, render_json_ui,
    render_text,
};
pub use spec::{
    Choice, Constraint, CrossFieldValidation, DEFAULT_TAB, FieldSpec, FieldType, FormSpec,
    LayoutMode, PageSpec, SpecError, TabSpec,
};
pub use validate::{REQUIRED_MESSAGE, ValidationError, ValidationResult, check_field, validate};
pub use values::{ValueMap, is_filled};
pub use visibility::{VisibilityMap, VisibilityMode, resolve_visibility};
