// Test Helpers Module - Testing Infrastructure
//
// In-memory persistence, recording service fakes and a shared setup used by
// the unit tests and the integration tests under tests/.

pub mod fakes;
pub mod in_memory_store;
pub mod shared_test_setup;

pub use fakes::{
    IssuedRequest, RecordingCallbacks, RecordingIssuer, RecordingNotifications, RecordingWallet,
    SentMail, SentNotification, WalletCall,
};
pub use in_memory_store::InMemoryIssuerStore;
pub use shared_test_setup::{SharedTestSetup, TEST_HOLDER_BPN, TEST_HOLDER_DID, TEST_ISSUER_BPN};
