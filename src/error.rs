use std::{
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /* configuration */

    #[error("`{0}` environment variable does not exist.")]
    MissingEnv(&'static str),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Failed to read env file `{path}`: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Home dir is not available")]
    HomeDirUnavailable,

    /* payments */

    #[error("Unknown cluster `{0}`")]
    UnknownCluster(String),

    #[error("Quote rejected: {0}")]
    QuoteRejected(String),

    #[error("Insufficient funds for `{address}`: balance {balance}unil, cost {cost}unil")]
    InsufficientFunds {
        address: String,
        balance: u64,
        cost: u64,
    },

    #[error("Payment receipt rejected: {0}")]
    ReceiptRejected(String),

    /* storage */

    #[error("Program `{0}` not found")]
    ProgramNotFound(String),

    #[error("Malformed program: {0}")]
    ProgramFormat(String),

    #[error("Values `{0}` not found")]
    ValuesNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /* compute */

    #[error("Compute failed: {0}")]
    Compute(String),

    #[error("Computation did not finish within {0:?}")]
    ComputeTimeout(Duration),

    #[error("Compute event stream closed before the computation finished")]
    EventStreamClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
