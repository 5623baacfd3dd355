//! Embeddable auth core: request routing, OAuth/OIDC provider handshakes,
//! and signed-cookie session management for a host web server.
//!
//! A host server constructs one [`router::Auth`] per deployment (providers
//! registered once, session manager owned exclusively) and feeds it an
//! [`io::InternalRequest`] built from its own native request on every
//! request that could touch auth: a static auth path (`/auth/session`,
//! `/auth/logout`), a provider login/callback, or any other path that still
//! needs its session cookies refreshed. [`router::Auth::handle`] never
//! panics; provider faults surface as `InternalResponse.error`, decode
//! soft-failures degrade silently to an anonymous request.
//!
//! This crate owns none of: framework adapters (translating a host's native
//! request/response into [`io::InternalRequest`]/[`io::InternalResponse`]),
//! the catalog of third-party provider presets (Google, GitHub, ...; see
//! [`provider::OAuthDefaultConfig`]/[`provider::OIDCDefaultConfig`] for the
//! shape a caller builds those from), or a UI for login pages.

pub mod checks;
pub mod cookie;
pub mod error;
pub mod future;
pub mod io;
pub mod provider;
pub mod router;
pub mod session;
pub mod token;

pub use error::{AuthError, AuthResult};
pub use io::{InternalRequest, InternalResponse};
pub use router::{Auth, AuthBuilder, Pages};
pub use session::{NewSession, RefreshInput, SessionManager, SessionManagerConfig};
