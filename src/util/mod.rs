//! Utilities
//!
//! Small types used throughout the crate.

mod ident;
mod span;

pub use ident::Ident;
pub use span::Span;
