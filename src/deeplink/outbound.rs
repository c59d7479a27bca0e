use url::Url;

use crate::{
    config::WalletConfig,
    deeplink::types::{CONNECT_CALLBACK, SIGN_CALLBACK, params},
    error::{AppError, Result},
};

/// Hands an outbound link to the OS. Completion is observed later as an
/// inbound deep link, never as a return value.
pub trait WalletLauncher: Send + Sync {
    fn open(&self, link: &Url) -> Result<()>;
}

/// Opens links with the platform's default handler.
pub struct SystemLauncher;

impl WalletLauncher for SystemLauncher {
    fn open(&self, link: &Url) -> Result<()> {
        open::that_detached(link.as_str())?;
        Ok(())
    }
}

/// Builds connect and sign-message requests for the wallet application.
#[derive(Debug, Clone)]
pub struct WalletLinks {
    connect_endpoint: Url,
    sign_endpoint: Url,
    app_url: String,
    redirect_scheme: String,
    cluster: String,
}

impl WalletLinks {
    pub fn new(config: &WalletConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');

        let connect_endpoint = Url::parse(&format!("{base}/connect"))?;
        let sign_endpoint = Url::parse(&format!("{base}/signMessage"))?;

        if connect_endpoint.cannot_be_a_base() {
            return Err(AppError::InvalidParams(
                "WALLET_BASE_URL must be a hierarchical URL".into(),
            ));
        }

        Ok(Self {
            connect_endpoint,
            sign_endpoint,
            app_url: config.app_url.clone(),
            redirect_scheme: config.redirect_scheme.clone(),
            cluster: config.cluster.clone(),
        })
    }

    fn callback(&self, target: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}://{target}", self.redirect_scheme))?)
    }

    pub fn connect_link(&self) -> Result<Url> {
        let redirect = self.callback(CONNECT_CALLBACK)?;

        let mut link = self.connect_endpoint.clone();
        link.query_pairs_mut()
            .append_pair("app_url", &self.app_url)
            .append_pair("redirect_link", redirect.as_str())
            .append_pair("cluster", &self.cluster);

        Ok(link)
    }

    /// The redirect link carries `nonce` so the wallet echoes it back with the
    /// signature.
    pub fn sign_link(&self, message: &str, nonce: &str, session: Option<&str>) -> Result<Url> {
        let mut redirect = self.callback(SIGN_CALLBACK)?;
        redirect
            .query_pairs_mut()
            .append_pair(params::BIND_NONCE, nonce);

        let mut link = self.sign_endpoint.clone();
        {
            let mut query = link.query_pairs_mut();
            query
                .append_pair("app_url", &self.app_url)
                .append_pair("redirect_link", redirect.as_str())
                .append_pair("message", &bs58::encode(message.as_bytes()).into_string())
                .append_pair("display", "utf8");

            if let Some(session) = session {
                query.append_pair(params::SESSION, session);
            }
        }

        Ok(link)
    }
}
