use thiserror::Error;

use transport::TransportError;

use crate::catalog::CatalogError;

pub type WmiResult<T> = Result<T, WmiError>;

#[derive(Debug, Error)]
pub enum WmiError {
    #[error("buffer of {requested} bytes exceeds max message length {max}")]
    NoResource { requested: usize, max: usize },

    #[error("target suspended, command {id:#x} refused")]
    Busy { id: u32 },

    #[error("stop in progress")]
    InvalidState,

    #[error("invalid parameters for command {id:#x}: {source}")]
    InvalidParams {
        id: u32,
        #[source]
        source: CatalogError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("event handler table full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("event {id:#x} already has a handler")]
    AlreadyRegistered { id: u32 },

    #[error("event {id:#x} has no handler")]
    NotRegistered { id: u32 },

    #[error("logical event {logical} has no wire mapping")]
    UnmappedEvent { logical: u32 },

    #[error("radio {radio} out of range ({count} attached)")]
    InvalidRadio { radio: usize, count: usize },

    #[error("{requested} radios requested, at most {max} supported")]
    TooManyRadios { requested: usize, max: usize },

    #[error("invalid wmi configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("soc detached")]
    Detached,

    #[error("failed to spawn rx worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl WmiError {
    /// Maps buffer sizing failures onto [`WmiError::NoResource`]; everything
    /// else stays a transport error.
    pub fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::NoResource { requested, max } => {
                WmiError::NoResource { requested, max }
            }
            other => WmiError::Transport(other),
        }
    }
}
