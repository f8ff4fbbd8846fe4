//! # External Services
//!
//! Collaborators reached by the step handlers and the batch services. HTTP
//! clients implementing these traits live with the host application.
//!
//! Implementations report transport failures worth retrying through
//! [`IssuerError::recoverable_service`](crate::error::IssuerError::recoverable_service);
//! the step then stays `TODO` and runs again on the next poll.

pub mod callback;
pub mod issuer;
pub mod notification;
pub mod wallet;

pub use callback::{CallbackService, IssuerResponseData, IssuerResponseStatus};
pub use issuer::{
    CreateBpnCredentialRequest, CreateFrameworkCredentialRequest,
    CreateMembershipCredentialRequest, CredentialIssuer,
};
pub use notification::{MailParameter, NotificationService};
pub use wallet::{CreatedCredential, WalletService};
