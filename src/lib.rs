//! Event reporting for Confidence, a feature flagging and experimentation platform.
//!
//! # Overview
//!
//! Applications fire events (e.g., flag exposures or user actions) that are sent back to the
//! Confidence events collector. Each [`Event`] carries a payload and a snapshot of the ambient
//! context, both made of [`ConfidenceValue`]s. Events are grouped into an [`EventBatch`] and
//! published with an [`EventUploader`].
//!
//! An upload never fails with an error. Instead it returns an [`UploadOutcome`] telling the caller
//! whether the batch can be discarded ([`UploadOutcome::Delivered`]) or should be kept for a later
//! attempt ([`UploadOutcome::Retry`]).
//!
//! Most applications don't need to drive the uploader directly. An [`EventSenderEngine`] keeps
//! track of the ambient context, consumes [`EventProducer`]s, and flushes batches periodically:
//!
//! ```no_run
//! # async fn run() -> confidence_events::Result<()> {
//! use std::collections::HashMap;
//! use confidence_events::{ConfidenceValue, EventsConfig};
//!
//! let engine = EventsConfig::from_client_secret("client-secret").start_engine()?;
//! engine.put_context(HashMap::from([(
//!     "visitor_id".to_owned(),
//!     ConfidenceValue::from("visitor-1"),
//! )]))?;
//! engine.emit(
//!     "navigate",
//!     HashMap::from([("target".to_owned(), ConfidenceValue::from("profile-page"))]),
//! )?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! Event reporting is best-effort and should never be critical enough to crash an application.
//! Returned errors are still valuable for debugging and usually indicate that developer's
//! attention is needed (e.g., a malformed payload).
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `confidence` target. Consider integrating a `log`-compatible logger implementation for
//! better visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod event;
mod producer;
mod uploader;
mod value;

#[cfg(test)]
mod test_support;

pub use config::{EventsConfig, Region};
pub use engine::EventSenderEngine;
pub use error::{Error, Result};
pub use event::{decode_batch, encode_batch, Event, EventBatch, Timestamp};
pub use producer::{ChannelEventProducer, ContextChange, EventProducer, ProducedEvent};
pub use uploader::{EventUploader, HttpTransport, ReqwestTransport, UploadOutcome};
pub use value::{ConfidenceValue, Struct};
