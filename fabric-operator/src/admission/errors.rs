//! Named admission rejections.
//!
//! The `reason()` string is what callers see in the admission response and
//! is stable across releases; tooling matches on it.

use crate::error::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("errNoPermission: {0}")]
    NoPermission(String),

    #[error("errHasNetwork: {0}")]
    HasNetwork(String),

    #[error("errChannelHasPeers: channel {0} still has peers")]
    ChannelHasPeers(String),

    #[error("errUpdateChannelMember: channel members are changed through proposals only")]
    UpdateChannelMember,

    #[error("errImmutableField: {0} cannot be changed")]
    Immutable(&'static str),

    #[error("errInUse: {0}")]
    InUse(String),

    #[error("errNotFound: {0}")]
    NotFound(String),

    #[error("errInvalid: {0}")]
    Invalid(String),

    #[error("ErrNullProposalPurpose: proposal must carry exactly one purpose")]
    NullProposalPurpose,

    #[error("ErrChangeProposalPurpose: proposal purpose cannot be changed")]
    ChangeProposalPurpose,

    #[error("ErrChangeVoteDecision: a cast vote cannot be changed")]
    ChangeVoteDecision,

    #[error("errDecode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("errLookup: {0}")]
    Lookup(StoreError),
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AdmissionError::NotFound(what),
            other => AdmissionError::Lookup(other),
        }
    }
}

impl AdmissionError {
    /// Stable reason string reported in the review response.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoPermission(_) => "errNoPermission",
            Self::HasNetwork(_) => "errHasNetwork",
            Self::ChannelHasPeers(_) => "errChannelHasPeers",
            Self::UpdateChannelMember => "errUpdateChannelMember",
            Self::Immutable(_) => "errImmutableField",
            Self::InUse(_) => "errInUse",
            Self::NotFound(_) => "errNotFound",
            Self::Invalid(_) => "errInvalid",
            Self::NullProposalPurpose => "ErrNullProposalPurpose",
            Self::ChangeProposalPurpose => "ErrChangeProposalPurpose",
            Self::ChangeVoteDecision => "ErrChangeVoteDecision",
            Self::Decode(_) => "errDecode",
            Self::Lookup(_) => "errLookup",
        }
    }

    /// HTTP-style code carried in the response status.
    pub fn code(&self) -> u16 {
        match self {
            Self::NoPermission(_) => 403,
            Self::Decode(_) => 400,
            Self::Lookup(_) => 500,
            _ => 422,
        }
    }
}

pub type AdmissionResult<T> = std::result::Result<T, AdmissionError>;
