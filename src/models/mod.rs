//! Core data models for the symbol proxy.
//!
//! These types describe what flows through a lookup: registry artifacts
//! (descriptors, then downloaded bytes), the debug-symbol files extracted
//! from them, and the wire shapes returned by the package registry API.

pub mod artifact;
pub mod registry;
pub mod symbol;
