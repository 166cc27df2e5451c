//! Core use-case services.
//!
//! # Responsibility
//! - Combine repository calls with the clock and the health signal.
//! - Keep callers decoupled from storage details.

pub mod entity_service;
