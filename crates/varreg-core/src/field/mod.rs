//! Dense displacement and velocity fields.

pub mod buffer;
pub mod vector_field;

pub use buffer::FieldBuffer;
pub use vector_field::VectorField;
