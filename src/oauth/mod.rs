//! OAuth login flows for the two provider identities the bot holds.
//!
//! Each provider gets one [`AuthSession`]: a request gate that drives the
//! authorization-code flow, keeps the resulting credential in memory,
//! refreshes it ahead of expiry, and publishes every new token pair to
//! subscribed collaborators.

mod notify;
mod provider;
mod session;
mod spotify;
mod twitch;

pub use notify::{CredentialNotifier, Credentials, SubscriptionId};
pub(crate) use provider::urlencode;
pub use provider::{OAuthProvider, ProviderConfig, RefreshPolicy, TokenSet};
pub use session::{AuthSession, Credential};
pub use spotify::SpotifyProvider;
pub use twitch::TwitchProvider;
