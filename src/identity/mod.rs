//! Session authentication core: session handles and lifecycle, the gate that
//! validates them, and the per-request context the gate publishes into.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod request_context;
mod gate;

pub use principal::UserId;
pub use session::{
    gen_token, removal_cookie, session_cookie, session_from_jar, LoginError, SessionHandle, SessionManager, SessionToken,
    TokenError, TokenSource,
};
pub use provider::{
    hash_password, verify_password, DirectoryError, MemoryUserDirectory, PgUserDirectory, UserDirectory, UserRecord,
};
pub use request_context::{AlreadyBound, RequestContext, IDENTITY_KEY};
pub use gate::{require_session, AuthError, AuthGate, AuthUser};
