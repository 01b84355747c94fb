//! OpenDAL Operator factory for strata storage accounts

use opendal::Operator;
use std::path::Path;
use strata_core::{StrataError, StrataResult};

/// Build an operator rooted at a local directory.
///
/// Used by the CLI to model an account as a directory; the directory is
/// created on first write.
pub fn build_fs_operator(root: &Path) -> StrataResult<Operator> {
    let root = root
        .to_str()
        .ok_or_else(|| StrataError::Config(format!("non-UTF-8 account root: {}", root.display())))?;
    // opendal 0.55: builders use the consuming pattern
    let builder = opendal::services::Fs::default().root(root);

    let op = Operator::new(builder)
        .map_err(|e| StrataError::Config(format!("creating OpenDAL fs operator: {e}")))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// In-process operator, used by tests and dry runs.
pub fn build_memory_operator() -> StrataResult<Operator> {
    let op = Operator::new(opendal::services::Memory::default())
        .map_err(|e| StrataError::Config(format!("creating OpenDAL memory operator: {e}")))?
        .finish();
    Ok(op)
}
