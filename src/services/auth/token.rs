use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{AppError, Result},
    services::auth::challenge::loose_string,
};

pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Session grant returned by a successful token exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub token_type: String,
    pub scope: Option<String>,
    pub user_id: Option<i64>,
    pub wallet_address: Option<String>,
    pub is_new_user: Option<bool>,
    pub issued_at: DateTime<Utc>,
}

/// Wire shape of the exchange response. Lenient fields stay untyped until
/// normalized in [`Token::from_value`].
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Value,
    token_type: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    scope: Option<String>,
    #[serde(default)]
    user_id: Value,
    #[serde(default, deserialize_with = "loose_string")]
    wallet_address: Option<String>,
    #[serde(default)]
    is_new_user: Value,
}

impl Token {
    pub fn parse(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| AppError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let response: TokenResponse =
            serde_json::from_value(value).map_err(|e| AppError::Parse(e.to_string()))?;

        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Parse("access_token is missing".into()))?;
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Parse("refresh_token is missing".into()))?;

        let expires_in = coerce_u64(&response.expires_in).unwrap_or_else(|| {
            tracing::warn!(
                raw = %response.expires_in,
                fallback = DEFAULT_EXPIRES_IN_SECS,
                "Unparseable expires_in, assuming short-lived token"
            );
            DEFAULT_EXPIRES_IN_SECS
        });

        Ok(Self {
            access_token,
            refresh_token,
            expires_in,
            token_type: response
                .token_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            scope: response.scope,
            user_id: coerce_i64(&response.user_id),
            wallet_address: response.wallet_address,
            is_new_user: coerce_bool(&response.is_new_user),
            issued_at: Utc::now(),
        })
    }

    /// Saturates at the latest representable instant for lifetimes chrono
    /// cannot express.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| self.issued_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once the access token is within `skew` of expiry.
    pub fn should_refresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let horizon = TimeDelta::from_std(skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        horizon >= self.expires_at()
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_expires_in_is_coerced() {
        let token =
            Token::parse(r#"{"access_token":"a","refresh_token":"b","expires_in":"120"}"#).unwrap();
        assert_eq!(token.expires_in, 120);
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn bogus_expires_in_falls_back() {
        let token =
            Token::parse(r#"{"access_token":"a","refresh_token":"b","expires_in":"bogus"}"#)
                .unwrap();
        assert_eq!(token.expires_in, DEFAULT_EXPIRES_IN_SECS);
    }

    #[test]
    fn missing_expires_in_falls_back() {
        let token = Token::parse(r#"{"access_token":"a","refresh_token":"b"}"#).unwrap();
        assert_eq!(token.expires_in, DEFAULT_EXPIRES_IN_SECS);
    }

    #[test]
    fn missing_refresh_token_is_a_parse_error() {
        let parsed = Token::parse(r#"{"access_token":"a","expires_in":60}"#);
        assert!(matches!(parsed, Err(AppError::Parse(_))));
    }

    #[test]
    fn user_id_accepts_integer_or_numeric_string() {
        let from_int = Token::parse(r#"{"access_token":"a","refresh_token":"b","user_id":42}"#)
            .unwrap();
        let from_str =
            Token::parse(r#"{"access_token":"a","refresh_token":"b","user_id":"42"}"#).unwrap();
        let bogus =
            Token::parse(r#"{"access_token":"a","refresh_token":"b","user_id":"abc"}"#).unwrap();

        assert_eq!(from_int.user_id, Some(42));
        assert_eq!(from_str.user_id, Some(42));
        assert_eq!(bogus.user_id, None);
    }

    #[test]
    fn optional_account_descriptors_are_kept() {
        let token = Token::parse(
            r#"{"access_token":"a","refresh_token":"b","token_type":"MAC","scope":"game",
                "wallet_address":"W1","is_new_user":true}"#,
        )
        .unwrap();

        assert_eq!(token.token_type, "MAC");
        assert_eq!(token.scope.as_deref(), Some("game"));
        assert_eq!(token.wallet_address.as_deref(), Some("W1"));
        assert_eq!(token.is_new_user, Some(true));
        assert_eq!(token.authorization_header(), "MAC a");
    }

    #[test]
    fn non_string_descriptors_are_dropped() {
        let token = Token::parse(
            r#"{"access_token":"a","refresh_token":"b","scope":["game","chat"],
                "wallet_address":{"base58":"W1"}}"#,
        )
        .unwrap();

        assert_eq!(token.scope, None);
        assert_eq!(token.wallet_address, None);
    }

    #[test]
    fn huge_lifetime_saturates_instead_of_overflowing() {
        let token = Token::parse(
            r#"{"access_token":"a","refresh_token":"b","expires_in":9223372036854775807}"#,
        )
        .unwrap();

        assert_eq!(token.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!token.should_refresh(Utc::now(), Duration::from_secs(60)));
        assert!(token.should_refresh(DateTime::<Utc>::MAX_UTC, Duration::from_secs(60)));

        let beyond_i64 = Token {
            expires_in: u64::MAX,
            ..token
        };
        assert_eq!(beyond_i64.expires_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn refresh_is_due_inside_skew_window() {
        let token =
            Token::parse(r#"{"access_token":"a","refresh_token":"b","expires_in":120}"#).unwrap();

        assert!(!token.should_refresh(token.issued_at, Duration::from_secs(60)));
        assert!(token.should_refresh(token.issued_at, Duration::from_secs(120)));
    }
}
