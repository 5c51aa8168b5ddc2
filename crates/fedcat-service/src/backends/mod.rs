//! Backends shipped with fedcat.
//!
//! Production storage engines live outside this crate and plug in through
//! [`crate::BackendRegistry`].

pub mod attribute;
pub mod memory;

pub use attribute::{AttributeDictionary, AttributeDictionaryConfig};
pub use memory::MemoryIndex;
