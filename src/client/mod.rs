//! Client side of the session: token persistence, refresh coalescing and the
//! request interceptor.

pub mod gate;
pub mod session;
pub mod storage;
pub mod transport;

pub use gate::{AuthGate, GateError, Navigator, DEFAULT_LOGIN_PATH};
pub use session::{AuthStatus, RefreshOutcome, SessionCache};
pub use storage::{FileTokenStorage, MemoryTokenStorage, StorageError, TokenStorage, TOKEN_KEY};
pub use transport::{HttpRefreshTransport, RefreshTransport, TransportError};
