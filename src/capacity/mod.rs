//! # Voice Capacity
//!
//! Shared voice-account ("umbrella") resolution and the concurrency budget
//! that gates voice dispatch.
//!
//! - [`resolver`] - tenant to umbrella mapping behind a 30 s TTL cache
//! - [`admission`] - per-umbrella and per-tenant call slots, released once per call
//! - [`cipher`] - AES-GCM credential encryption

pub mod admission;
pub mod cipher;
pub mod resolver;

pub use admission::{AdmissionControl, InProcessAdmissionControl, ReleasedCalls};
pub use cipher::{AesGcmCredentialCipher, CipherError, CipherResult, CredentialCipher};
pub use resolver::{CapacityError, CapacityResolver, CapacityResult, UmbrellaResolver};
