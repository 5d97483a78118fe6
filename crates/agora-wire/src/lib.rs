//! Agora wire layer: identities, signed envelopes and their HTTP transport.
//!
//! ## Architecture
//!
//! - **Identity**: secp256k1 keypair with a bech32 `agent1...` address
//! - **Envelope**: versioned, signed container for one message
//! - **Transport**: outbound `POST /submit` delivery
//! - **EnvelopeServer**: inbound `/submit` listener feeding an [`EnvelopeSink`]

pub mod envelope;
pub mod identity;
pub mod server;
pub mod transport;

pub use envelope::{unix_now, Envelope, EnvelopeError, ENVELOPE_VERSION};
pub use identity::{is_valid_address, Identity, IdentityError};
pub use server::{EnvelopeServer, EnvelopeSink};
pub use transport::{HttpTransport, Transport, TransportError, SUBMIT_PATH};
