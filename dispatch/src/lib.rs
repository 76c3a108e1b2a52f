//! Emergency alert dispatch.
//!
//! Takes a position and an optional voice clip, stores the clip, and fans
//! out one SMS and one voice call to every saved contact. Per-contact
//! failures are reported in the response, never raised.
//!
//! # Modules
//!
//! - [`types`]: wire types shared with clients
//! - [`contacts`]: contact store and phone validation
//! - [`recordings`]: clip storage and public links
//! - [`templates`]: SMS bodies and call scripts
//! - [`messenger`]: messaging provider capability (Twilio REST)
//! - [`dispatcher`]: the fan-out itself
//! - [`server`]: HTTP routes
//!
//! # Usage
//!
//! ```bash
//! TWILIO_SID=AC... TWILIO_AUTH_TOKEN=... TWILIO_PHONE=+1... \
//! PUBLIC_BASE_URL=https://sos.example.com sos-dispatch --port 5000
//! ```

pub mod config;
pub mod contacts;
pub mod dispatcher;
pub mod error;
pub mod messenger;
pub mod recordings;
pub mod server;
pub mod templates;
pub mod types;

pub use config::DispatchConfig;
pub use contacts::{ContactError, ContactStore, InMemoryContactStore, SharedContactStore};
pub use dispatcher::{AlertDispatcher, AlertRequest, AudioUpload, DispatchError};
pub use messenger::{
    Messenger, ProviderError, ProviderReceipt, SharedMessenger, TwilioConfig, TwilioMessenger,
};
pub use recordings::{InMemoryRecordingStore, RecordingStore, SharedRecordingStore};
pub use server::{router, AppState};
pub use types::{
    AttemptKind, Channel, Contact, ContactsResponse, Coordinates, DeliveryOutcome,
    DeliveryResult, DispatchResponse, MessageResponse, NewContact,
};
