//! Vendor-specific integrations.
pub mod gemini;
