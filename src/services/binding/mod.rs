pub mod machine;
pub mod service;
pub mod session;
pub mod store;

pub use machine::{BindingMachine, Transition};
pub use service::{BindingNotice, BindingService};
pub use session::{BindingSession, BindingState, WalletRequest};
pub use store::{FileTokenSink, SessionStore, TokenSink};
