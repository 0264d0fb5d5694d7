//! Core engine for chunked file uploads: a staging area that
//! accumulates chunks as they arrive, and a merge pipeline that
//! validates the sequence and assembles the final file.

pub mod error;
pub mod merge;
pub mod staging;

pub use error::{CoreError, Result};
