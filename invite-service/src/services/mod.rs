pub mod coordinator;
pub mod data;
pub mod error;
pub mod identity;
pub mod mail;

pub use coordinator::{InvitationCoordinator, InviteOutcome};
pub use data::{HttpMembershipStore, MembershipStore, MembershipUpsert};
pub use error::InviteError;
pub use identity::{Caller, HttpIdentity, IdentityProvider};
pub use mail::{MailProvider, SmtpMailer};
