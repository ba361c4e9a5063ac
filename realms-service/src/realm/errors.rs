//! `RealmRejection` (domain, §7) and the WellKnown validation failures folded into it (§4.1).

use thiserror::Error;

use super::model::Label;

/// Domain rejection returned as a plain value; never retried (§7, §8).
#[derive(Error, Debug)]
pub enum RealmRejection {
    #[error("realm `{0}` already exists")]
    RealmAlreadyExists(Label),

    #[error("realm `{0}` not found")]
    RealmNotFound(Label),

    #[error("realm `{0}` is already deprecated")]
    RealmAlreadyDeprecated(Label),

    #[error("incorrect revision: provided {provided}, expected {expected}")]
    IncorrectRev { provided: u64, expected: u64 },

    #[error("issuer `{issuer}` is already used by realm `{other}`")]
    DuplicateIssuer { issuer: String, other: Label },

    #[error(transparent)]
    WellKnown(#[from] WellKnownRejection),
}

/// Failure modes of the WellKnown resolver (C1, §4.1), each a distinct variant per the spec.
#[derive(Error, Debug)]
pub enum WellKnownRejection {
    #[error("unsuccessful response fetching the OpenID configuration document")]
    UnsuccessfulOpenIdConfigResponse,

    #[error("OpenID configuration document is not in the expected format")]
    IllegalOpenIdConfigFormat,

    #[error("unsuccessful response fetching the JWKS document")]
    UnsuccessfulJwksResponse,

    #[error("JWKS document is not in the expected format")]
    IllegalJwksFormat,

    #[error("no valid RS256 signature-verification key was found in the JWKS")]
    NoValidKeysFound,

    #[error("issuer field is missing or empty")]
    IllegalIssuer,

    #[error("grant_types_supported contains an unrecognized grant type")]
    IllegalGrantType,

    #[error("endpoint `{0}` is missing or not an absolute URL")]
    IllegalEndpoint(&'static str),
}
