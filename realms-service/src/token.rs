//! C2 — the bearer-token verifier: RS256 JWT in, [`Caller`] out.
//!
//! Grounded in the teacher's `token.rs`, which decodes with `picky::jose::jws::RawJws`, verifies
//! against a `picky::key::PublicKey`, and validates claims with `picky::jose::jwt::JwtValidator`.
//! This verifier differs from the teacher's single-provisioner-key model in one way: the
//! signature-verification key is not known up front — it is looked up from the realm index by
//! the token's own `iss` claim (§4.2), so the header/payload are peeked before the key is known.

use std::collections::BTreeSet;
use std::sync::Arc;

use picky::jose::jwk::Jwk;
use picky::jose::jws::RawJws;
use picky::jose::jwt::{JwtDate, JwtSig, JwtValidator};
use picky::key::PublicKey;
use serde_json::Value;
use thiserror::Error;

use crate::realm::index::RealmIndex;
use crate::realm::model::{Caller, Identity};

/// A JWT leeway accommodating modest clock skew between the issuer and this service.
const LEEWAY_SECS: u16 = 30;

/// Bearer-token rejection (§4.2, wrapped as `InvalidAccessToken` at the façade boundary, §7).
#[derive(Error, Debug)]
pub enum TokenRejection {
    #[error("access token is not a well-formed signed JWT")]
    InvalidAccessTokenFormat,

    #[error("access token does not contain an issuer")]
    AccessTokenDoesNotContainAnIssuer,

    #[error("access token issuer does not match any active realm")]
    UnknownAccessTokenIssuer,

    #[error("access token signature or claims are invalid")]
    InvalidAccessToken,

    #[error("access token does not contain a subject")]
    AccessTokenDoesNotContainSubject,
}

/// Verifies a bearer string against the realms known to `index`, producing the [`Caller`] it
/// asserts (§4.2's eight steps).
pub fn verify(bearer: &str, index: &Arc<dyn RealmIndex>, now: time::OffsetDateTime) -> Result<Caller, TokenRejection> {
    let raw_jws = RawJws::decode(bearer).map_err(|_| TokenRejection::InvalidAccessTokenFormat)?;

    let unverified_claims: Value =
        serde_json::from_slice(raw_jws.peek_payload()).map_err(|_| TokenRejection::InvalidAccessTokenFormat)?;
    if unverified_claims.is_null() || !unverified_claims.is_object() {
        return Err(TokenRejection::InvalidAccessTokenFormat);
    }

    let issuer = unverified_claims
        .get("iss")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(TokenRejection::AccessTokenDoesNotContainAnIssuer)?;

    let realm = index.find_by_issuer(issuer).ok_or(TokenRejection::UnknownAccessTokenIssuer)?;
    let active = match &realm.value {
        crate::realm::model::ResourceValue::Active(active) if !realm.deprecated => active,
        _ => return Err(TokenRejection::UnknownAccessTokenIssuer),
    };

    let public_key = select_verification_key(&active.keys, &raw_jws).ok_or(TokenRejection::InvalidAccessToken)?;

    let jwt: JwtSig = raw_jws
        .verify(&public_key)
        .map(JwtSig::from)
        .map_err(|_| TokenRejection::InvalidAccessToken)?;

    let validator = JwtValidator::lenient(JwtDate::new_with_leeway(now.unix_timestamp(), LEEWAY_SECS));
    let claims = jwt
        .validate::<Value>(&validator)
        .map_err(|_| TokenRejection::InvalidAccessToken)?
        .state
        .claims;

    let subject = claims
        .get("preferred_username")
        .and_then(Value::as_str)
        .or_else(|| claims.get("sub").and_then(Value::as_str))
        .ok_or(TokenRejection::AccessTokenDoesNotContainSubject)?;

    let groups = extract_groups(&claims);

    let realm_id = realm.id.clone();
    let mut identities = BTreeSet::from([
        Identity::Anonymous,
        Identity::Authenticated { realm: realm_id.clone() },
        Identity::User {
            subject: subject.to_owned(),
            realm: realm_id.clone(),
        },
    ]);
    identities.extend(groups.into_iter().map(|group| Identity::Group {
        name: group,
        realm: realm_id.clone(),
    }));

    Ok(Caller {
        subject: Identity::User {
            subject: subject.to_owned(),
            realm: realm_id,
        },
        identities,
    })
}

/// Picks the key matching the JWS header's `kid` if present, else the first RS256 key — the
/// realm's key set is already filtered to RS256 sig keys at WellKnown resolution time (C1).
fn select_verification_key(keys: &[crate::realm::model::RealmKey], raw_jws: &RawJws<'_>) -> Option<PublicKey> {
    let candidate = match &raw_jws.header.kid {
        Some(kid) => keys.iter().find(|k| k.kid.as_deref() == Some(kid.as_str())).or_else(|| keys.first()),
        None => keys.first(),
    }?;
    PublicKey::from_der(&candidate.public_key_der).ok()
}

/// Converts a freshly-fetched JWKS into [`RealmKey`](crate::realm::model::RealmKey)s, filtering
/// to RS256 keys whose `use` is `sig` or absent (§4.1).
pub fn jwks_to_realm_keys(jwks: &picky::jose::jwk::JwkSet) -> Vec<crate::realm::model::RealmKey> {
    jwks.keys
        .iter()
        .filter(|jwk| is_rs256_signature_key(jwk))
        .filter_map(|jwk| {
            let public_key = jwk.to_public_key().ok()?;
            let der = public_key.to_der().ok()?;
            Some(crate::realm::model::RealmKey {
                kid: jwk.kid.clone(),
                public_key_der: der,
            })
        })
        .collect()
}

fn is_rs256_signature_key(jwk: &Jwk) -> bool {
    use picky::jose::jwk::{Jwa, JwkPubKeyUse};
    use picky::jose::jws::JwsAlg;

    if !jwk.key.is_rsa() {
        return false;
    }
    let use_ok = matches!(jwk.key_use, None | Some(JwkPubKeyUse::Signature));
    let alg_ok = matches!(jwk.alg, None | Some(Jwa::Sig(JwsAlg::RS256)));
    use_ok && alg_ok
}

fn extract_groups(claims: &Value) -> Vec<String> {
    match claims.get("groups") {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect(),
        Some(Value::String(csv)) => csv.split(',').map(|g| g.trim().to_owned()).filter(|g| !g.is_empty()).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_claim_falls_back_from_array_to_csv_to_empty() {
        assert_eq!(
            extract_groups(&serde_json::json!({"groups": ["g1", "g2"]})),
            vec!["g1".to_owned(), "g2".to_owned()]
        );
        assert_eq!(
            extract_groups(&serde_json::json!({"groups": "g1, g2, g3"})),
            vec!["g1".to_owned(), "g2".to_owned(), "g3".to_owned()]
        );
        assert_eq!(extract_groups(&serde_json::json!({})), Vec::<String>::new());
        assert_eq!(extract_groups(&serde_json::json!({"groups": 42})), Vec::<String>::new());
    }

    #[test]
    fn invalid_jws_format_is_rejected_before_issuer_lookup() {
        let index: Arc<dyn RealmIndex> = Arc::new(crate::realm::index::InMemoryRealmIndex::new());
        let err = verify("not-a-jwt", &index, time::OffsetDateTime::now_utc()).unwrap_err();
        assert!(matches!(err, TokenRejection::InvalidAccessTokenFormat));
    }

    #[test]
    fn unknown_issuer_is_rejected() {
        let index: Arc<dyn RealmIndex> = Arc::new(crate::realm::index::InMemoryRealmIndex::new());
        // A syntactically valid, unsigned-alg-less JWS whose payload carries only `iss`.
        let payload = base64_url(br#"{"iss":"https://unknown.example.com"}"#);
        let header = base64_url(br#"{"alg":"RS256","typ":"JWT"}"#);
        let signature = base64_url(b"not-a-real-signature");
        let token = format!("{header}.{payload}.{signature}");
        let err = verify(&token, &index, time::OffsetDateTime::now_utc()).unwrap_err();
        assert!(matches!(err, TokenRejection::UnknownAccessTokenIssuer));
    }

    fn base64_url(bytes: &[u8]) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        URL_SAFE_NO_PAD.encode(bytes)
    }
}
