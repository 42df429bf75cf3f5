#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Lode core: canonical types, consensus parameters, script encoding,
//! hashing, and serialization helpers.

pub mod address;
pub mod constants;
pub mod merkle;
pub mod params;
pub mod script;
pub mod serialization;
pub mod types;

pub use address::*;
pub use constants::*;
pub use merkle::*;
pub use params::*;
pub use script::Script;
pub use serialization::*;
pub use types::*;
