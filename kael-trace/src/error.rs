use thiserror::Error;

#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("symbol engine initialization failed for target {0}")]
    InitFailed(u32),

    #[error("target process could not be opened")]
    CouldNotOpenTarget,
}
