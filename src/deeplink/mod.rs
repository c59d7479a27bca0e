pub mod gateway;
pub mod outbound;
pub mod types;

pub use gateway::{DeepLinkGateway, GatewayHandle};
pub use outbound::{SystemLauncher, WalletLauncher, WalletLinks};
pub use types::{DeepLinkEvent, LinkKind, LinkOrigin, WalletFailure};
