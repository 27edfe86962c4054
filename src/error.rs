use thiserror::Error;

/// Everything that can go wrong while interpreting bytes received from (or
/// destined for) a state-history node. A retry against the same node will not
/// fix any of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("stream ended: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid bool value {0}")]
    InvalidBool(u8),
    #[error("varuint32 does not fit in 32 bits")]
    VarintOverflow,
    #[error("invalid utf8 in string")]
    InvalidUtf8,
    #[error("abi is not valid json: {0}")]
    AbiJson(String),
    #[error("unsupported abi version {0}")]
    UnsupportedAbiVersion(String),
    #[error("abi redefines {0}")]
    Redefinition(String),
    #[error("unknown type {0}")]
    UnknownType(String),
    #[error("{0}")]
    InvalidAbi(String),
    #[error("{0} is not a variant")]
    NotAVariant(String),
    #[error("invalid index {index} for variant {variant}")]
    InvalidVariantIndex { variant: String, index: u32 },
    #[error("variant {variant} has no case {case}")]
    MissingVariantCase { variant: String, case: String },
    #[error("result received before the schema")]
    ResultBeforeSchema,
    #[error("unsupported result {0}")]
    UnsupportedResult(String),
    #[error("recursion limit reached")]
    RecursionLimit,
}

/// The terminal reason a connection stopped. Every driver run ends in exactly
/// one of these and it decides the `retry` flag handed to
/// [`ConnectionCallbacks::closed`](crate::networking::callbacks::ConnectionCallbacks::closed).
#[derive(Error, Debug)]
pub enum Fault {
    #[error("{step}: {message}")]
    Transport { step: &'static str, message: String },
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    #[error("{0}")]
    Consumer(String),
    #[error("consumer requested stop")]
    Stopped,
    #[error("close requested")]
    Requested { retry: bool },
}

impl Fault {
    pub fn transport(step: &'static str, err: impl std::fmt::Display) -> Self {
        Fault::Transport {
            step,
            message: err.to_string(),
        }
    }

    /// Transport faults are likely transient; everything else needs a change
    /// on one side or the other before reconnecting makes sense.
    pub fn retry(&self) -> bool {
        match self {
            Fault::Transport { .. } => true,
            Fault::Requested { retry } => *retry,
            Fault::Protocol(_) | Fault::Consumer(_) | Fault::Stopped => false,
        }
    }
}
