//! Mod info script normalization.
//!
//! Every artifact ships an info script that declares its author, name,
//! version and a table of user-facing configuration options. Scripts are
//! untrusted and wildly inconsistent, so this crate never runs them itself: a
//! [`ScriptEvaluator`] produces a [`RawTable`] of whatever the script defined,
//! and [`Normalizer`] turns that into [`ScriptMetadata`] with classified
//! [`ConfigurationOption`]s, or nothing at all.

pub mod error;
mod metadata;
mod option;
mod value;

pub use crate::metadata::{FnEvaluator, Normalizer, ScriptEvaluator, ScriptGlobals, ScriptMetadata, extract_metadata};
pub use crate::option::{ConfigValue, ConfigurationOption, ConfigurationOptionItem, OptionKind, classify};
pub use crate::value::{RawKey, RawTable, RawValue, ScriptValue};
