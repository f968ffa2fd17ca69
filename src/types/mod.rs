//! Typed keys and runtime values.
//!
//! [`Key`] is the engine's comparable, self-describing key type; [`Value`]
//! and [`ColumnType`] carry row data and schema declarations above it.

mod key;
mod value;

pub use key::Key;
pub use value::{value_to_key, ColumnType, Value};
