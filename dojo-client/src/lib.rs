//! dojo-client: stores, session gateway and backend adapters for Dojo.
//!
//! The stores hold the local view of the signed-in user's katas and profile,
//! apply changes optimistically, and reconcile with the remote store.

pub mod dojo;
pub mod error;
pub mod locks;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod ports;
pub mod profile_store;
pub mod session;
pub mod supabase;
pub mod task_store;

pub use dojo::Dojo;
pub use error::{AuthError, RemoteError, StoreError};
pub use ports::{
    AuthEvent, AuthEventKind, AuthUser, IdentityProvider, OAuthProvider, OAuthRedirect,
    OAuthRequest, RemoteStore, Session, SignUp,
};
pub use profile_store::{ProfileState, ProfileStore};
pub use session::{SessionGateway, SessionState, SignUpOutcome, INIT_SESSION_TIMEOUT};
pub use supabase::{SupabaseClient, SupabaseConfig};
pub use task_store::{Completion, TaskState, TaskStore};
