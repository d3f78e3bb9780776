use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::JwtConfig;

/// JWT payload issued by the account service; only `sub` is consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub iat: usize,  // issued at (unix timestamp)
    pub exp: usize,  // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
}

/// Signs an HS256 token for `user_id`, valid for `ttl_secs`.
pub fn sign_token(
    cfg: &JwtConfig,
    user_id: Uuid,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = OffsetDateTime::now_utc();
    let claims = Claims {
        sub: user_id,
        iat: now.unix_timestamp() as usize,
        exp: (now + Duration::seconds(ttl_secs)).unix_timestamp() as usize,
        iss: cfg.issuer.clone(),
        aud: cfg.audience.clone(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
}

/// Checks signature, expiry, issuer and audience.
pub fn verify_token(cfg: &JwtConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.set_audience(std::slice::from_ref(&cfg.audience));
    validation.set_issuer(std::slice::from_ref(&cfg.issuer));
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(secret: &str, issuer: &str, audience: &str) -> JwtConfig {
        JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    #[test]
    fn sign_and_verify() {
        let c = cfg("dev-secret", "test-issuer", "test-aud");
        let user_id = Uuid::new_v4();
        let token = sign_token(&c, user_id, 60).expect("sign");
        let claims = verify_token(&c, &token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[test]
    fn rejects_wrong_issuer_or_audience() {
        let token = sign_token(&cfg("same", "good-iss", "good-aud"), Uuid::new_v4(), 60).unwrap();
        assert!(verify_token(&cfg("same", "bad-iss", "good-aud"), &token).is_err());
        assert!(verify_token(&cfg("same", "good-iss", "bad-aud"), &token).is_err());
    }

    #[test]
    fn rejects_expired_and_foreign_tokens() {
        let c = cfg("dev-secret", "iss", "aud");
        // past the default 60s leeway
        let expired = sign_token(&c, Uuid::new_v4(), -300).unwrap();
        assert!(verify_token(&c, &expired).is_err());

        let foreign = sign_token(&cfg("other-secret", "iss", "aud"), Uuid::new_v4(), 60).unwrap();
        assert!(verify_token(&c, &foreign).is_err());
    }
}
