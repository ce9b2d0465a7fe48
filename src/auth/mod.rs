pub mod basic;
pub mod identity;
pub mod session;

pub use identity::{IdentityError, IdentityProvider, LocalIdentity};
pub use session::{SessionCodec, SessionData};
