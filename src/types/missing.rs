//! Missing data reason codes
//!
//! Each nullable observation field (value, stderr, sample size) carries a reason code describing
//! why it is null. Exactly one reason holds whenever the field is null, and the code must be
//! [Missing::NotMissing] whenever the field is present.
//!
//! The codes are part of the external API and are (de)serialised as integers.

use serde::{Deserialize, Serialize};

use crate::error::EpidataError;

/// Reason a field is missing
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Missing {
    /// The field is present
    #[default]
    NotMissing,
    /// The field is not meaningful for this observation, e.g. the stderr of a derived value
    NotApplicable,
    /// The source withholds the field for this region
    RegionException,
    /// Any other reason
    Other,
    /// The observation was deleted by the source
    Deleted,
}

impl Missing {
    /// Integer code used in storage and responses.
    pub fn code(self) -> u8 {
        match self {
            Self::NotMissing => 0,
            Self::NotApplicable => 1,
            Self::RegionException => 2,
            Self::Other => 5,
            Self::Deleted => 6,
        }
    }

    /// Returns the reason code consistent with a field's presence.
    ///
    /// Present fields are always [Missing::NotMissing]. Null fields keep the claimed reason,
    /// unless the claim is [Missing::NotMissing], in which case [Missing::Other] is used.
    pub fn coerce<T>(self, field: Option<T>) -> Self {
        match (field, self) {
            (Some(_), _) => Self::NotMissing,
            (None, Self::NotMissing) => Self::Other,
            (None, reason) => reason,
        }
    }

    /// Returns whether this code agrees with a field's presence.
    pub fn is_consistent<T>(self, field: Option<T>) -> bool {
        field.is_some() == (self == Self::NotMissing)
    }

    /// Reason code for a computed field: present values are not missing, absent ones are not
    /// applicable.
    pub fn for_derived<T>(field: Option<T>) -> Self {
        if field.is_some() {
            Self::NotMissing
        } else {
            Self::NotApplicable
        }
    }
}

impl From<Missing> for u8 {
    fn from(missing: Missing) -> Self {
        missing.code()
    }
}

impl TryFrom<u8> for Missing {
    type Error = EpidataError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::NotMissing),
            1 => Ok(Self::NotApplicable),
            2 => Ok(Self::RegionException),
            5 => Ok(Self::Other),
            6 => Ok(Self::Deleted),
            other => Err(EpidataError::InvalidMissingCode(other)),
        }
    }
}
