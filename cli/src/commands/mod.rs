//! CLI Commands

pub mod plan;
pub mod simulate;
pub mod validate;
