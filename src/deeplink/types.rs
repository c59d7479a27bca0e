use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

pub const CONNECT_CALLBACK: &str = "onconnect";
pub const SIGN_CALLBACK: &str = "onsignmessage";

/// Query/fragment keys of the plaintext wallet callback contract.
pub mod params {
    pub const PUBLIC_KEY: &str = "public_key";
    pub const ADDRESS_ALIASES: [&str; 2] = ["address", "wallet_address"];
    pub const SIGNATURE: &str = "signature";
    pub const SESSION: &str = "session";
    pub const ERROR_CODE: &str = "errorCode";
    pub const ERROR_MESSAGE: &str = "errorMessage";
    pub const BIND_NONCE: &str = "bind_nonce";
    /// Sealed result some wallets send instead of plaintext fields.
    pub const ENCRYPTED_PAYLOAD: &str = "data";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    WalletConnectCallback,
    WalletSignCallback,
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkOrigin {
    ColdStart,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletFailure {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLinkEvent {
    pub kind: LinkKind,
    pub origin: LinkOrigin,
    pub raw: String,
    params: BTreeMap<String, String>,
}

impl DeepLinkEvent {
    pub fn classify(raw: &str, origin: LinkOrigin) -> Self {
        let Ok(url) = Url::parse(raw.trim()) else {
            return Self {
                kind: LinkKind::Unrecognized,
                origin,
                raw: raw.to_string(),
                params: BTreeMap::new(),
            };
        };

        let kind = if matches_target(&url, CONNECT_CALLBACK) {
            LinkKind::WalletConnectCallback
        } else if matches_target(&url, SIGN_CALLBACK) {
            LinkKind::WalletSignCallback
        } else {
            LinkKind::Unrecognized
        };

        let mut params = BTreeMap::new();
        if let Some(fragment) = url.fragment() {
            params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }
        // query wins over fragment
        params.extend(url.query_pairs().into_owned());

        Self {
            kind,
            origin,
            raw: raw.to_string(),
            params,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn wallet_address(&self) -> Option<&str> {
        self.param(params::PUBLIC_KEY).or_else(|| {
            params::ADDRESS_ALIASES
                .iter()
                .find_map(|alias| self.param(alias))
        })
    }

    pub fn signature(&self) -> Option<&str> {
        self.param(params::SIGNATURE)
    }

    pub fn session(&self) -> Option<&str> {
        self.param(params::SESSION)
    }

    pub fn bind_nonce(&self) -> Option<&str> {
        self.param(params::BIND_NONCE)
    }

    /// The wallet answered with a sealed payload this client cannot read.
    pub fn is_encrypted(&self) -> bool {
        self.param(params::ENCRYPTED_PAYLOAD).is_some()
    }

    pub fn failure(&self) -> Option<WalletFailure> {
        let code = self.param(params::ERROR_CODE);
        let message = self.param(params::ERROR_MESSAGE);

        if code.is_none() && message.is_none() {
            return None;
        }

        Some(WalletFailure {
            code: code.map(str::to_string),
            message: message.unwrap_or("wallet reported an error").to_string(),
        })
    }
}

fn matches_target(url: &Url, target: &str) -> bool {
    url.host_str()
        .is_some_and(|host| host.eq_ignore_ascii_case(target))
        || url.path().trim_matches('/').eq_ignore_ascii_case(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_host_case_insensitively() {
        let event = DeepLinkEvent::classify(
            "pixelgame://OnConnect?public_key=W1",
            LinkOrigin::Live,
        );
        assert_eq!(event.kind, LinkKind::WalletConnectCallback);
        assert_eq!(event.wallet_address(), Some("W1"));
    }

    #[test]
    fn classifies_by_path() {
        let event = DeepLinkEvent::classify(
            "https://game.example.com/onSignMessage?signature=S&bind_nonce=N1",
            LinkOrigin::ColdStart,
        );
        assert_eq!(event.kind, LinkKind::WalletSignCallback);
        assert_eq!(event.origin, LinkOrigin::ColdStart);
        assert_eq!(event.signature(), Some("S"));
        assert_eq!(event.bind_nonce(), Some("N1"));
    }

    #[test]
    fn other_links_are_unrecognized() {
        for raw in [
            "pixelgame://leaderboard",
            "https://game.example.com/wallet/onconnect",
            "not a uri",
        ] {
            assert_eq!(
                DeepLinkEvent::classify(raw, LinkOrigin::Live).kind,
                LinkKind::Unrecognized,
                "{raw}"
            );
        }
    }

    #[test]
    fn fragment_params_are_read_and_query_wins() {
        let event = DeepLinkEvent::classify(
            "pixelgame://onconnect?address=Q#address=F&session=S1",
            LinkOrigin::Live,
        );
        assert_eq!(event.wallet_address(), Some("Q"));
        assert_eq!(event.session(), Some("S1"));
    }

    #[test]
    fn error_params_become_failure() {
        let event = DeepLinkEvent::classify(
            "pixelgame://onconnect?errorCode=4001&errorMessage=User%20rejected",
            LinkOrigin::Live,
        );
        let failure = event.failure().unwrap();
        assert_eq!(failure.code.as_deref(), Some("4001"));
        assert_eq!(failure.message, "User rejected");
    }
}
