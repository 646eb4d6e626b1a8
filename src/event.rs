//! Wire records sent to the events collector.
//!
//! An [`EventBatch`] serializes to the following JSON shape:
//!
//! ```json
//! {
//!   "clientSecret": "my-client-secret",
//!   "events": [
//!     {
//!       "eventDefinition": "eventDefinitions/navigate",
//!       "eventTime": "2018-01-01T00:00:00.000Z",
//!       "payload": {
//!         "current": "home-page",
//!         "target": "profile-page"
//!       },
//!       "context": {
//!         "user_id": "1234"
//!       }
//!     }
//!   ],
//!   "sendTime": "2018-01-01T00:00:00.000Z"
//! }
//! ```
use std::collections::HashMap;

use chrono::Utc;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{ConfidenceValue, Error, Result};

/// UTC timestamp used on the wire.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A single fired event.
///
/// Events are immutable once created. The `context` is a snapshot of the ambient context taken
/// when the event fired.
///
/// Deserialization enforces the same validation as [`Event::new`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    event_definition: String,
    #[serde(serialize_with = "iso8601::serialize")]
    event_time: Timestamp,
    payload: HashMap<String, ConfidenceValue>,
    context: ConfidenceValue,
}

impl Event {
    /// Create a new event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEventDefinition`] if `event_definition` is empty.
    ///
    /// # Examples
    /// ```
    /// # use std::collections::HashMap;
    /// # use confidence_events::{ConfidenceValue, Event};
    /// let event = Event::new(
    ///     "eventDefinitions/navigate",
    ///     chrono::Utc::now(),
    ///     HashMap::from([("target".to_owned(), ConfidenceValue::from("profile-page"))]),
    ///     ConfidenceValue::Struct(HashMap::new()),
    /// )
    /// .unwrap();
    /// assert_eq!(event.event_definition(), "eventDefinitions/navigate");
    /// ```
    pub fn new(
        event_definition: impl Into<String>,
        event_time: Timestamp,
        payload: HashMap<String, ConfidenceValue>,
        context: ConfidenceValue,
    ) -> Result<Event> {
        let event_definition = event_definition.into();
        if event_definition.is_empty() {
            return Err(Error::InvalidEventDefinition);
        }
        Ok(Event {
            event_definition,
            event_time,
            payload,
            context,
        })
    }

    /// Identifier of the event definition, e.g. `eventDefinitions/navigate`.
    pub fn event_definition(&self) -> &str {
        &self.event_definition
    }

    /// When the event fired.
    pub fn event_time(&self) -> Timestamp {
        self.event_time
    }

    /// Event payload.
    pub fn payload(&self) -> &HashMap<String, ConfidenceValue> {
        &self.payload
    }

    /// Context snapshot taken when the event fired.
    pub fn context(&self) -> &ConfidenceValue {
        &self.context
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Event, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawEvent::deserialize(deserializer)?
            .validate()
            .map_err(de::Error::custom)
    }
}

/// Unvalidated wire form of [`Event`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    event_definition: String,
    #[serde(deserialize_with = "iso8601::deserialize")]
    event_time: Timestamp,
    payload: HashMap<String, ConfidenceValue>,
    context: ConfidenceValue,
}

impl RawEvent {
    fn validate(self) -> Result<Event> {
        Event::new(
            self.event_definition,
            self.event_time,
            self.payload,
            self.context,
        )
    }
}

/// A group of events sent together in one upload attempt.
///
/// Events keep the order in which they were fired.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    client_secret: String,
    events: Vec<Event>,
    #[serde(serialize_with = "iso8601::serialize")]
    send_time: Timestamp,
}

impl<'de> Deserialize<'de> for EventBatch {
    fn deserialize<D>(deserializer: D) -> std::result::Result<EventBatch, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawEventBatch::deserialize(deserializer)?
            .validate()
            .map_err(de::Error::custom)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventBatch {
    client_secret: String,
    events: Vec<RawEvent>,
    #[serde(deserialize_with = "iso8601::deserialize")]
    send_time: Timestamp,
}

impl RawEventBatch {
    fn validate(self) -> Result<EventBatch> {
        let events = self
            .events
            .into_iter()
            .map(RawEvent::validate)
            .collect::<Result<Vec<_>>>()?;
        Ok(EventBatch::with_send_time(
            self.client_secret,
            events,
            self.send_time,
        ))
    }
}

impl EventBatch {
    /// Create a batch stamped with the current time as its send time.
    pub fn new(client_secret: impl Into<String>, events: Vec<Event>) -> EventBatch {
        EventBatch::with_send_time(client_secret, events, Utc::now())
    }

    /// Create a batch with an explicit send time.
    pub fn with_send_time(
        client_secret: impl Into<String>,
        events: Vec<Event>,
        send_time: Timestamp,
    ) -> EventBatch {
        EventBatch {
            client_secret: client_secret.into(),
            events,
            send_time,
        }
    }

    /// Client secret identifying the sending application.
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Events in fire order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Time of the upload attempt.
    pub fn send_time(&self) -> Timestamp {
        self.send_time
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take the events back, e.g. to rebuild the batch for a later retry.
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

/// Encode a batch into the collector's JSON body.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if a payload or context value is a NaN or infinite double.
pub fn encode_batch(batch: &EventBatch) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(batch)?)
}

/// Decode a batch from its JSON body.
///
/// # Errors
///
/// - [`Error::Serialization`] if `bytes` is not a valid batch. This includes payload or context
///   values of unknown type.
/// - [`Error::InvalidEventDefinition`] if any event has an empty definition.
pub fn decode_batch(bytes: &[u8]) -> Result<EventBatch> {
    let raw: RawEventBatch = serde_json::from_slice(bytes)?;
    raw.validate()
}

/// ISO-8601 UTC timestamps with millisecond precision, e.g. `2018-01-01T00:00:00.000Z`.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    // Accept any RFC 3339 offset, not only `Z`.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|time| time.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}
