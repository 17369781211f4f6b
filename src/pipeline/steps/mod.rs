//! Built-in step implementations.

pub mod abort;
pub mod constants;
pub mod dummy;
pub mod filter;
pub mod generator;
pub mod script;
pub mod select_values;

pub use abort::AbortStep;
pub use constants::ConstantsStep;
pub use dummy::DummyStep;
pub use filter::{CompareOp, FilterStep};
pub use generator::{FieldSpec, GeneratorStep};
pub use script::ScriptStep;
pub use select_values::SelectValuesStep;
