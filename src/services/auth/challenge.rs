use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Challenge material issued by the backend for one binding attempt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeTemplate {
    #[serde(deserialize_with = "required_loose_string")]
    pub nonce: String,

    #[serde(default, deserialize_with = "loose_string")]
    pub message: Option<String>,

    #[serde(default, alias = "message_template", deserialize_with = "loose_string")]
    pub message_template: Option<String>,

    #[serde(default, alias = "issued_at", deserialize_with = "loose_string")]
    pub issued_at: Option<String>,

    #[serde(default, alias = "expire_at", deserialize_with = "loose_string")]
    pub expire_at: Option<String>,

    #[serde(default, deserialize_with = "loose_string")]
    pub domain: Option<String>,
}

/// Values substituted into a message template.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChallengeVars<'a> {
    pub wallet_address: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub issued_at: Option<&'a str>,
    pub expire_at: Option<&'a str>,
    pub domain: Option<&'a str>,
}

impl<'a> ChallengeVars<'a> {
    fn lookup(&self, placeholder: &str) -> Option<&'a str> {
        let value = match placeholder {
            "walletAddress" => self.wallet_address,
            "nonce" => self.nonce,
            "issuedAt" => self.issued_at,
            "expireAt" => self.expire_at,
            "domain" => self.domain,
            _ => return None,
        };
        Some(value.unwrap_or(""))
    }
}

impl ChallengeTemplate {
    /// The exact text the wallet is asked to sign for `wallet_address`.
    pub fn challenge_message(&self, wallet_address: &str) -> Result<String> {
        if let Some(message) = &self.message {
            return Ok(message.clone());
        }

        let template = self.message_template.as_deref().ok_or_else(|| {
            AppError::Parse("Challenge has neither message nor messageTemplate".into())
        })?;

        Ok(render(
            template,
            &ChallengeVars {
                wallet_address: Some(wallet_address),
                nonce: Some(&self.nonce),
                issued_at: self.issued_at.as_deref(),
                expire_at: self.expire_at.as_deref(),
                domain: self.domain.as_deref(),
            },
        ))
    }
}

/// Replaces `{walletAddress}`, `{nonce}`, `{issuedAt}`, `{expireAt}` and
/// `{domain}` in a single pass. Other braces are copied through untouched, and
/// substituted values are never rescanned.
pub fn render(template: &str, vars: &ChallengeVars<'_>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let candidate = &rest[open..];

        match candidate[1..].find(['}', '{']) {
            Some(close) if candidate.as_bytes()[close + 1] == b'}' => {
                let name = &candidate[1..close + 1];
                match vars.lookup(name) {
                    Some(value) => rendered.push_str(value),
                    None => rendered.push_str(&candidate[..close + 2]),
                }
                rest = &candidate[close + 2..];
            }
            _ => {
                rendered.push('{');
                rest = &candidate[1..];
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn loose_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_string(Value::deserialize(deserializer)?))
}

fn required_loose_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    value_to_string(Value::deserialize(deserializer)?)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| serde::de::Error::custom("nonce must be a non-empty string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders() {
        let vars = ChallengeVars {
            wallet_address: Some("W1"),
            nonce: Some("N1"),
            issued_at: Some("T1"),
            ..Default::default()
        };

        assert_eq!(
            render("Sign in {walletAddress} with {nonce} at {issuedAt}", &vars),
            "Sign in W1 with N1 at T1"
        );
    }

    #[test]
    fn absent_values_render_empty_and_unknown_placeholders_survive() {
        let vars = ChallengeVars {
            nonce: Some("N1"),
            ..Default::default()
        };

        assert_eq!(
            render("{domain}|{nonce}|{chainId}|{ {nonce}}|{", &vars),
            "|N1|{chainId}|{ N1}|{"
        );
    }

    #[test]
    fn every_occurrence_is_replaced_and_values_are_not_rescanned() {
        let vars = ChallengeVars {
            wallet_address: Some("{nonce}"),
            nonce: Some("N1"),
            ..Default::default()
        };

        assert_eq!(
            render("{nonce}-{walletAddress}-{nonce}", &vars),
            "N1-{nonce}-N1"
        );
    }

    #[test]
    fn rendering_is_idempotent_for_identical_inputs() {
        let vars = ChallengeVars {
            wallet_address: Some("W1"),
            nonce: Some("N1"),
            domain: Some("game.example.com"),
            ..Default::default()
        };
        let template = "{domain} wants you to sign in with {walletAddress}\nNonce: {nonce}";

        assert_eq!(render(template, &vars), render(template, &vars));
    }

    #[test]
    fn literal_message_wins_over_template() {
        let challenge: ChallengeTemplate = serde_json::from_value(serde_json::json!({
            "nonce": "N1",
            "message": "Verbatim {nonce}",
            "messageTemplate": "Bind {walletAddress}/{nonce}"
        }))
        .unwrap();

        assert_eq!(challenge.challenge_message("W1").unwrap(), "Verbatim {nonce}");
    }

    #[test]
    fn template_is_rendered_for_wallet() {
        let challenge: ChallengeTemplate = serde_json::from_value(serde_json::json!({
            "nonce": "N1",
            "messageTemplate": "Bind {walletAddress}/{nonce} until {expireAt}",
            "expireAt": 1767225600
        }))
        .unwrap();

        assert_eq!(
            challenge.challenge_message("W1").unwrap(),
            "Bind W1/N1 until 1767225600"
        );
    }

    #[test]
    fn challenge_without_nonce_is_rejected() {
        let parsed: std::result::Result<ChallengeTemplate, _> =
            serde_json::from_value(serde_json::json!({ "messageTemplate": "{nonce}" }));
        assert!(parsed.is_err());
    }

    #[test]
    fn challenge_without_any_text_is_a_parse_error() {
        let challenge: ChallengeTemplate =
            serde_json::from_value(serde_json::json!({ "nonce": "N1" })).unwrap();
        assert!(matches!(
            challenge.challenge_message("W1"),
            Err(AppError::Parse(_))
        ));
    }
}
