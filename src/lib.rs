//! jobforge: job script generation from layered configuration.
//!
//! Configuration records merge by filling gaps in priority order; recipe
//! fragments render against the merged metadata and each artifact is
//! written exactly once, when its builder scope closes.

pub mod cli;
pub mod core;
pub mod flavors;
