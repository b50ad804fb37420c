//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the arm console and controller hub.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Robot data model shared by every component
pub mod robot;

/// Hub protocol messages: invocations, completions and push events
pub mod hub;

/// Network module
pub mod net;
