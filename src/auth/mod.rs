//! Request authentication.
//!
//! Two cookies carry a session: the signed access token and the encrypted
//! presence marker. The gate and the extractors only read them; the session
//! endpoint is the single place that renews them.

mod cookie;
mod errors;
mod extractors;
mod gate;
mod ip;
mod state;
mod types;

pub use cookie::{
    ACCESS_COOKIE_NAME, PRESENCE_COOKIE_NAME, append_set_cookie, build_cookie,
    clear_session_cookies, get_cookie,
};
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, AnyRole, Auth, MaybeClaims, RoleConstraint};
pub use gate::{DenyReason, EdgeGate, GateDecision, GateState, edge_gate};
pub use ip::{HasHeadersAndExtensions, UNKNOWN_CLIENT, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
