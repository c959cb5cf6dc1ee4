//! Variable registry: scoped symbol tables and the values they expose

pub mod index;
pub mod names;
pub mod value;

pub use index::{RegistryOptions, Scope, Variable, VariableId, VariableIndex, VariableOptions, VariableOwner};
pub use names::{compose_key, fix_name, simple_hash, truncate_key};
pub use value::{number_changed, Value, ValueCell, VariableType};
