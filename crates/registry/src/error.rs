use fluxnode_storage::StoreError;

/// Failure taxonomy of the registry.
///
/// `Consensus` rejections are recovered at the block boundary: the driver
/// drops the block and no registry state changes. `Store` and `Invariant`
/// are never recovered in-process; the node aborts with the diagnostic and
/// rebuilds on restart. `NotApplicable` is a query-time condition that
/// leaves state untouched.
#[derive(Debug)]
pub enum RegistryError {
    Consensus(&'static str),
    Store(StoreError),
    Invariant(&'static str),
    NotApplicable(&'static str),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Consensus(message) => write!(f, "{message}"),
            RegistryError::Store(err) => write!(f, "{err}"),
            RegistryError::Invariant(message) => write!(f, "{message}"),
            RegistryError::NotApplicable(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        RegistryError::Store(err)
    }
}
