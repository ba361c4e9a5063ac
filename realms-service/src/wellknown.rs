//! C1 — the OIDC discovery (WellKnown) resolver.
//!
//! Fetches and validates `.well-known/openid-configuration`, then the JWKS it points to. The
//! HTTP leg is behind a small trait so tests can substitute a fixture instead of a live reqwest
//! client, the same seam the teacher draws around its own outbound collaborators (e.g.
//! `ngrok.rs`'s tunnel API client trait).

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::realm::errors::WellKnownRejection;
use crate::realm::model::{GrantType, RealmEndpoints, RealmKey};
use crate::retry::RetryPolicy;
use crate::token::jwks_to_realm_keys;

/// The fields extracted from a realm's `.well-known/openid-configuration` plus its JWKS (§4.1).
#[derive(Debug, Clone)]
pub struct WellKnown {
    pub issuer: String,
    pub grant_types: BTreeSet<GrantType>,
    pub endpoints: RealmEndpoints,
    pub keys: Vec<RealmKey>,
}

/// Abstracts "fetch this URL and parse it as JSON", so the resolver itself stays free of reqwest
/// in its signature and is trivially testable with an in-memory fixture.
#[async_trait]
pub trait HttpJson: Send + Sync {
    async fn get_json(&self, url: &Url) -> anyhow::Result<Value>;
}

/// Production [`HttpJson`] backed by `reqwest`.
pub struct ReqwestHttpJson {
    client: reqwest::Client,
}

impl ReqwestHttpJson {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpJson for ReqwestHttpJson {
    async fn get_json(&self, url: &Url) -> anyhow::Result<Value> {
        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("unsuccessful response ({}) fetching {url}", response.status());
        }
        Ok(response.json::<Value>().await?)
    }
}

/// Fetches and validates the discovery document at `config_url`, then its JWKS, retrying
/// transient HTTP failures per `retry` (C8). Fields are validated in the deterministic order
/// `issuer → jwks_uri → authorization → token → userinfo → grant_types → revocation →
/// end_session` (§4.1): the first failing field's rejection is returned unchanged.
pub async fn resolve(http: &dyn HttpJson, config_url: &Url, retry: &RetryPolicy) -> Result<WellKnown, WellKnownRejection> {
    let document = retry
        .retry(|| http.get_json(config_url), |_| true)
        .await
        .map_err(|_| WellKnownRejection::UnsuccessfulOpenIdConfigResponse)?;

    let object = document.as_object().ok_or(WellKnownRejection::IllegalOpenIdConfigFormat)?;

    let issuer = object
        .get("issuer")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(WellKnownRejection::IllegalIssuer)?
        .to_owned();

    let jwks_uri = required_url(object, "jwks_uri").map_err(|_| WellKnownRejection::IllegalEndpoint("jwks_uri"))?;
    let authorization_endpoint =
        required_url(object, "authorization_endpoint").map_err(|_| WellKnownRejection::IllegalEndpoint("authorization_endpoint"))?;
    let token_endpoint = required_url(object, "token_endpoint").map_err(|_| WellKnownRejection::IllegalEndpoint("token_endpoint"))?;
    let user_info_endpoint =
        required_url(object, "userinfo_endpoint").map_err(|_| WellKnownRejection::IllegalEndpoint("userinfo_endpoint"))?;

    let grant_types = match object.get("grant_types_supported") {
        None | Some(Value::Null) => BTreeSet::new(),
        Some(Value::Array(items)) => {
            let mut set = BTreeSet::new();
            for item in items {
                let raw = item.as_str().ok_or(WellKnownRejection::IllegalGrantType)?;
                set.insert(GrantType::from_wire(raw).ok_or(WellKnownRejection::IllegalGrantType)?);
            }
            set
        }
        Some(_) => return Err(WellKnownRejection::IllegalGrantType),
    };

    let revocation_endpoint = optional_url(object, "revocation_endpoint").map_err(|_| WellKnownRejection::IllegalEndpoint("revocation_endpoint"))?;
    let end_session_endpoint =
        optional_url(object, "end_session_endpoint").map_err(|_| WellKnownRejection::IllegalEndpoint("end_session_endpoint"))?;

    let jwks_document = retry
        .retry(|| http.get_json(&jwks_uri), |_| true)
        .await
        .map_err(|_| WellKnownRejection::UnsuccessfulJwksResponse)?;

    let jwk_set: picky::jose::jwk::JwkSet =
        serde_json::from_value(jwks_document).map_err(|_| WellKnownRejection::IllegalJwksFormat)?;

    let keys = jwks_to_realm_keys(&jwk_set);
    if keys.is_empty() {
        return Err(WellKnownRejection::NoValidKeysFound);
    }

    Ok(WellKnown {
        issuer,
        grant_types,
        endpoints: RealmEndpoints {
            authorization_endpoint,
            token_endpoint,
            user_info_endpoint,
            revocation_endpoint,
            end_session_endpoint,
        },
        keys,
    })
}

fn required_url(object: &serde_json::Map<String, Value>, field: &str) -> anyhow::Result<Url> {
    let raw = object.get(field).and_then(Value::as_str).filter(|s| !s.is_empty());
    match raw {
        Some(raw) => Ok(raw.parse::<Url>()?),
        None => anyhow::bail!("missing field `{field}`"),
    }
}

fn optional_url(object: &serde_json::Map<String, Value>, field: &str) -> anyhow::Result<Option<Url>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.is_empty() => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.parse::<Url>()?)),
        Some(_) => anyhow::bail!("field `{field}` is not a string"),
    }
}
