//! Core data model: realm identity, state, events, commands and the projected resource shape.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

/// The realm identity and shard key: `[A-Za-z0-9_-]{1,32}`, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid realm label: {0:?} (expected 1-32 characters in [A-Za-z0-9_-])")]
pub struct InvalidLabel(String);

impl Label {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Label {
    type Err = InvalidLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= 32
            && s.bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');

        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidLabel(s.to_owned()))
        }
    }
}

impl TryFrom<String> for Label {
    type Error = InvalidLabel;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// OIDC grant types recognized by the discovery document validator (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    Password,
    ClientCredentials,
    RefreshToken,
    DeviceCode,
    JwtBearer,
    Saml2Bearer,
}

impl GrantType {
    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "authorization_code" => Self::AuthorizationCode,
            "implicit" => Self::Implicit,
            "password" => Self::Password,
            "client_credentials" => Self::ClientCredentials,
            "refresh_token" => Self::RefreshToken,
            "device_code" => Self::DeviceCode,
            "jwt_bearer" => Self::JwtBearer,
            "saml2_bearer" => Self::Saml2Bearer,
            _ => return None,
        })
    }
}

/// A single RS256 signature-verification key extracted from a realm's JWKS (`use=sig` or absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmKey {
    pub kid: Option<String>,
    /// PKCS#1 DER-encoded RSA public key, as returned by `picky`'s JWK conversion.
    pub public_key_der: Vec<u8>,
}

/// The set of endpoints and fields validated out of a realm's `.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmEndpoints {
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub user_info_endpoint: Url,
    pub revocation_endpoint: Option<Url>,
    pub end_session_endpoint: Option<Url>,
}

/// The fields carried by `RealmCreated`/`RealmUpdated` and by the `Active` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmFields {
    pub name: String,
    pub open_id_config: Url,
    pub issuer: String,
    pub keys: Vec<RealmKey>,
    pub grant_types: BTreeSet<GrantType>,
    pub logo: Option<Url>,
    pub endpoints: RealmEndpoints,
}

/// Fields retained once a realm is `Deprecated` (no endpoints, no keys — I4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecatedFields {
    pub name: String,
    pub open_id_config: Url,
    pub logo: Option<Url>,
}

/// Bookkeeping fields common to every non-`Initial` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: SubjectId,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub updated_by: SubjectId,
}

/// The subject (identity) that caused an event — `Anonymous` or an authenticated caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubjectId {
    Anonymous,
    User { subject: String, realm: Label },
}

/// `RealmState`, the four (three encoded, one derived) variants of §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum RealmState {
    Initial,
    Active {
        id: Label,
        rev: u64,
        fields: RealmFields,
        audit: Audit,
    },
    Deprecated {
        id: Label,
        rev: u64,
        fields: DeprecatedFields,
        audit: Audit,
    },
}

impl Default for RealmState {
    fn default() -> Self {
        Self::Initial
    }
}

/// `Current = Active ∪ Deprecated`, derived rather than a fourth enum variant.
pub enum Current<'a> {
    Active {
        id: &'a Label,
        rev: u64,
        fields: &'a RealmFields,
        audit: &'a Audit,
    },
    Deprecated {
        id: &'a Label,
        rev: u64,
        fields: &'a DeprecatedFields,
        audit: &'a Audit,
    },
}

impl RealmState {
    pub fn as_current(&self) -> Option<Current<'_>> {
        match self {
            RealmState::Initial => None,
            RealmState::Active { id, rev, fields, audit } => Some(Current::Active {
                id,
                rev: *rev,
                fields,
                audit,
            }),
            RealmState::Deprecated { id, rev, fields, audit } => Some(Current::Deprecated {
                id,
                rev: *rev,
                fields,
                audit,
            }),
        }
    }

    pub fn rev(&self) -> u64 {
        match self {
            RealmState::Initial => 0,
            RealmState::Active { rev, .. } | RealmState::Deprecated { rev, .. } => *rev,
        }
    }

    pub fn is_deprecated(&self) -> bool {
        matches!(self, RealmState::Deprecated { .. })
    }
}

/// `RealmEvent`, the three variants of §3. Tagged `realm` for the projector's journal filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum RealmEvent {
    RealmCreated {
        id: Label,
        rev: u64,
        fields: RealmFields,
        #[serde(with = "time::serde::rfc3339")]
        instant: OffsetDateTime,
        subject: SubjectId,
    },
    RealmUpdated {
        id: Label,
        rev: u64,
        fields: RealmFields,
        #[serde(with = "time::serde::rfc3339")]
        instant: OffsetDateTime,
        subject: SubjectId,
    },
    RealmDeprecated {
        id: Label,
        rev: u64,
        #[serde(with = "time::serde::rfc3339")]
        instant: OffsetDateTime,
        subject: SubjectId,
    },
}

impl RealmEvent {
    pub fn id(&self) -> &Label {
        match self {
            RealmEvent::RealmCreated { id, .. } | RealmEvent::RealmUpdated { id, .. } | RealmEvent::RealmDeprecated { id, .. } => id,
        }
    }

    pub fn rev(&self) -> u64 {
        match self {
            RealmEvent::RealmCreated { rev, .. } | RealmEvent::RealmUpdated { rev, .. } | RealmEvent::RealmDeprecated { rev, .. } => *rev,
        }
    }
}

/// `Command`, the three variants of §3. `prior_rev` is absent only for `Create`.
///
/// `Create`/`Update` carry an already-resolved [`RealmFields`]: the WellKnown fetch (C1) and the
/// duplicate-issuer check happen in the caller (the domain façade, C7) so that [`evaluate`](super::state::evaluate)
/// stays a pure, total function over its inputs, with no I/O of its own.
#[derive(Debug, Clone)]
pub enum Command {
    Create {
        id: Label,
        subject: SubjectId,
        fields: RealmFields,
    },
    Update {
        id: Label,
        prior_rev: u64,
        subject: SubjectId,
        fields: RealmFields,
    },
    Deprecate {
        id: Label,
        prior_rev: u64,
        subject: SubjectId,
    },
}

impl Command {
    pub fn id(&self) -> &Label {
        match self {
            Command::Create { id, .. } | Command::Update { id, .. } | Command::Deprecate { id, .. } => id,
        }
    }
}

/// The public `nxv:Realm` resource type tag (§3, mirrors the `types` field on `Resource`).
pub const RESOURCE_TYPE: &str = "nxv:Realm";

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResourceValue {
    Active(ActiveProjection),
    Deprecated(DeprecatedProjection),
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveProjection {
    pub name: String,
    pub open_id_config: Url,
    pub issuer: String,
    pub grant_types: BTreeSet<GrantType>,
    pub logo: Option<Url>,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub user_info_endpoint: Url,
    pub revocation_endpoint: Option<Url>,
    pub end_session_endpoint: Option<Url>,
    /// Public signature-verification keys; this is where the token verifier pulls its key set from.
    pub keys: Vec<RealmKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeprecatedProjection {
    pub name: String,
    pub open_id_config: Url,
    pub logo: Option<Url>,
}

/// `Resource`, the read-side projection of `Current` (§3), replicated in the index.
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: Label,
    pub rev: u64,
    pub types: [&'static str; 1],
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: SubjectId,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub updated_by: SubjectId,
    pub deprecated: bool,
    #[serde(flatten)]
    pub value: ResourceValue,
}

impl Resource {
    pub fn from_current(state: &RealmState) -> Option<Self> {
        match state.as_current()? {
            Current::Active { id, rev, fields, audit } => Some(Resource {
                id: id.clone(),
                rev,
                types: [RESOURCE_TYPE],
                created_at: audit.created_at,
                created_by: audit.created_by.clone(),
                updated_at: audit.updated_at,
                updated_by: audit.updated_by.clone(),
                deprecated: false,
                value: ResourceValue::Active(ActiveProjection {
                    name: fields.name.clone(),
                    open_id_config: fields.open_id_config.clone(),
                    issuer: fields.issuer.clone(),
                    grant_types: fields.grant_types.clone(),
                    logo: fields.logo.clone(),
                    authorization_endpoint: fields.endpoints.authorization_endpoint.clone(),
                    token_endpoint: fields.endpoints.token_endpoint.clone(),
                    user_info_endpoint: fields.endpoints.user_info_endpoint.clone(),
                    revocation_endpoint: fields.endpoints.revocation_endpoint.clone(),
                    end_session_endpoint: fields.endpoints.end_session_endpoint.clone(),
                    keys: fields.keys.clone(),
                }),
            }),
            Current::Deprecated { id, rev, fields, audit } => Some(Resource {
                id: id.clone(),
                rev,
                types: [RESOURCE_TYPE],
                created_at: audit.created_at,
                created_by: audit.created_by.clone(),
                updated_at: audit.updated_at,
                updated_by: audit.updated_by.clone(),
                deprecated: true,
                value: ResourceValue::Deprecated(DeprecatedProjection {
                    name: fields.name.clone(),
                    open_id_config: fields.open_id_config.clone(),
                    logo: fields.logo.clone(),
                }),
            }),
        }
    }

    /// Issuer of an `Active` resource, used by the token verifier to find a realm by `iss`.
    pub fn active_issuer(&self) -> Option<&str> {
        match &self.value {
            ResourceValue::Active(active) if !self.deprecated => Some(active.issuer.as_str()),
            _ => None,
        }
    }
}

/// `ResourceMetadata`, the write-operation response shape (§4.7, §6).
#[derive(Debug, Clone, Serialize)]
pub struct ResourceMetadata {
    pub id: Label,
    pub rev: u64,
    pub types: [&'static str; 1],
    pub deprecated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub created_by: SubjectId,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub updated_by: SubjectId,
}

impl From<&Resource> for ResourceMetadata {
    fn from(r: &Resource) -> Self {
        Self {
            id: r.id.clone(),
            rev: r.rev,
            types: r.types,
            deprecated: r.deprecated,
            created_at: r.created_at,
            created_by: r.created_by.clone(),
            updated_at: r.updated_at,
            updated_by: r.updated_by.clone(),
        }
    }
}

/// `Identity`, the four variants consumed by the ACL subsystem (§3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "@type")]
pub enum Identity {
    Anonymous,
    Authenticated { realm: Label },
    User { subject: String, realm: Label },
    Group { name: String, realm: Label },
}

/// `Caller`, the authenticated principal plus its derived identities (§3).
#[derive(Debug, Clone, Serialize)]
pub struct Caller {
    pub subject: Identity,
    pub identities: BTreeSet<Identity>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self {
            subject: Identity::Anonymous,
            identities: BTreeSet::from([Identity::Anonymous]),
        }
    }
}
