use thiserror::Error;
use tidemark_client_api_messages::DeltaDecodeError;
use tidemark_durability::PersistError;
use tidemark_query::QueryError;

/// Failures of the paged pull. Transport errors are retried with backoff
/// before they surface as `Exhausted`.
#[derive(Error, Debug)]
pub enum CatchupError {
    #[error("catchup transport: {0}")]
    Transport(String),
    #[error("catchup response does not decode: {0}")]
    Decode(String),
    #[error("catchup gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("QueryError: {0}")]
    Query(#[from] QueryError),
    #[error("PersistError: {0}")]
    Persist(#[from] PersistError),
    #[error("DeltaDecodeError: {0}")]
    DeltaDecode(#[from] DeltaDecodeError),
    #[error("CatchupError: {0}")]
    Catchup(#[from] CatchupError),
    #[error("no subscription with query id `{0}`")]
    UnknownQuery(String),
}
