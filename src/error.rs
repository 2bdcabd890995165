use thiserror::Error;

/// Failures of loading, configuring and sampling.
#[derive( Debug, Error )]
pub enum Error {
    #[error( "dimension mismatch: universe of size {left} combined with universe of size {right}" )]
    DimensionMismatch { left: usize, right: usize },

    #[error( "index {index} out of range for universe of size {size}" )]
    IndexOutOfRange { index: usize, size: usize },

    #[error( "item {0} does not occur in the database" )]
    UnknownItem( usize ),

    #[error( "malformed input on line {line}: {reason} ({content:?})" )]
    Malformed { line: usize, content: String, reason: String },

    #[error( "i/o failure: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "json failure: {0}" )]
    Json( #[from] serde_json::Error ),

    #[error( "transaction {tid} has invalid weight {weight}, weights must be finite and positive" )]
    InvalidWeight { tid: usize, weight: f64 },

    #[error( "invalid bias {weight} (item {item:?}), biases must be finite and positive" )]
    InvalidBias { item: Option<usize>, weight: f64 },

    #[error( "support tilt {0} breaks monotonicity, it must be finite and non-negative" )]
    InvalidTilt( f64 ),

    #[error( "cannot sample from a database without transactions" )]
    EmptyDatabase,

    #[error( "chains did not coalesce after {attempts} attempts (window {window})" )]
    NotCoalesced { attempts: usize, window: usize },

    #[error( "all {0} epochs produced itemsets outside the pattern language" )]
    Rejected( usize ),

    #[error( "sampling was cancelled" )]
    Cancelled,

    #[error( "invalid configuration: {0}" )]
    Config( String ),
}

pub type Result<T> = std::result::Result<T, Error>;
