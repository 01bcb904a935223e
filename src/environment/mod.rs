//! Environment Management Module
//!
//! Handles integration with conda/micromamba for running rules inside
//! the environment their descriptor declares.

pub mod conda;

pub use conda::{ensure_env, run_in_env, CondaEnv, MICROMAMBA_PATH};
