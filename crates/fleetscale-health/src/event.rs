//! Health event decoding.
//!
//! Payloads arrive as a single JSON object whose only key is the event
//! name and whose value is a flat object of string properties:
//!
//! ```text
//! { "avg-load-average": { "member_id": "m1", "value": "3.5" } }
//! ```
//!
//! `RawEvent::decode` enforces that shape and nothing else. Mapping the
//! name and properties onto a typed `HealthEvent` happens in a second
//! step so that unknown event names can be skipped cheaply.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DecodeError, EventError};
use crate::metric::{MetricField, MetricKind};

pub const AVERAGE_REQUESTS_IN_FLIGHT: &str = "avg-requests-in-flight";
pub const GRADIENT_OF_REQUESTS_IN_FLIGHT: &str = "gradient-requests-in-flight";
pub const SECOND_DERIVATIVE_OF_REQUESTS_IN_FLIGHT: &str = "second-derivative-requests-in-flight";
pub const AVERAGE_LOAD_AVERAGE: &str = "avg-load-average";
pub const GRADIENT_OF_LOAD_AVERAGE: &str = "gradient-load-average";
pub const SECOND_DERIVATIVE_OF_LOAD_AVERAGE: &str = "second-derivative-load-average";
pub const AVERAGE_MEMORY_CONSUMPTION: &str = "avg-memory-consumption";
pub const GRADIENT_OF_MEMORY_CONSUMPTION: &str = "gradient-memory-consumption";
pub const SECOND_DERIVATIVE_OF_MEMORY_CONSUMPTION: &str = "second-derivative-memory-consumption";
pub const MEMBER_FAULT: &str = "member-fault";

const CLUSTER_ID: &str = "cluster_id";
const PARTITION_ID: &str = "partition_id";
const MEMBER_ID: &str = "member_id";
const VALUE: &str = "value";

/// An event name plus its unordered string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    pub properties: HashMap<String, String>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, properties: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Decode a payload. Anything other than exactly one event name
    /// mapped to a flat object of strings is rejected as a whole.
    ///
    /// Keys are counted as written, so a repeated event name is reported
    /// as `MultipleEvents` and a repeated property as `DuplicateProperty`.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let Entries(mut events) = serde_json::from_str::<Entries<Entries<String>>>(payload)?;

        if events.len() > 1 {
            return Err(DecodeError::MultipleEvents(events.len()));
        }
        let (name, Entries(pairs)) = events.pop().ok_or(DecodeError::Empty)?;

        let mut properties = HashMap::with_capacity(pairs.len());
        for (key, value) in pairs {
            match properties.entry(key) {
                Entry::Occupied(e) => {
                    return Err(DecodeError::DuplicateProperty {
                        event: name,
                        property: e.key().clone(),
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(value);
                }
            }
        }
        Ok(Self { name, properties })
    }

    /// Encode back into the wire shape accepted by `decode`.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut wire = BTreeMap::new();
        wire.insert(&self.name, &self.properties);
        serde_json::to_string(&wire)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<&str, EventError> {
        self.property(key).ok_or_else(|| EventError::MissingProperty {
            event: self.name.clone(),
            property: key,
        })
    }

    fn require_value(&self) -> Result<f32, EventError> {
        let raw = self.require(VALUE)?;
        raw.trim()
            .parse::<f32>()
            .map_err(|_| EventError::InvalidValue {
                event: self.name.clone(),
                property: VALUE,
                value: raw.to_string(),
            })
    }
}

/// The key/value pairs of one JSON object in document order, repeated
/// keys included.
struct Entries<V>(Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Entries<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, V>()? {
                    entries.push(entry);
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// A decoded health event, one variant per kind the autoscaler acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// Requests-in-flight statistic for a network partition, addressed
    /// by the partition that reported it.
    RequestsInFlight {
        cluster_id: String,
        partition_id: String,
        field: MetricField,
        value: f32,
    },
    /// Load or memory statistic for one member.
    MemberMetric {
        member_id: String,
        kind: MetricKind,
        field: MetricField,
        value: f32,
    },
    /// A member became unhealthy and should be replaced.
    MemberFault {
        cluster_id: String,
        /// Empty when the signal did not name a member.
        member_id: String,
    },
}

impl HealthEvent {
    /// Map a raw event onto its typed form.
    ///
    /// Returns `Ok(None)` for event names this pipeline does not handle.
    pub fn from_raw(raw: &RawEvent) -> Result<Option<Self>, EventError> {
        if raw.name == MEMBER_FAULT {
            return Ok(Some(HealthEvent::MemberFault {
                cluster_id: raw.require(CLUSTER_ID)?.to_string(),
                member_id: raw.property(MEMBER_ID).unwrap_or_default().to_string(),
            }));
        }

        if let Some(field) = requests_in_flight_field(&raw.name) {
            return Ok(Some(HealthEvent::RequestsInFlight {
                cluster_id: raw.require(CLUSTER_ID)?.to_string(),
                partition_id: raw.require(PARTITION_ID)?.to_string(),
                field,
                value: raw.require_value()?,
            }));
        }

        if let Some((kind, field)) = member_metric_target(&raw.name) {
            return Ok(Some(HealthEvent::MemberMetric {
                member_id: raw.require(MEMBER_ID)?.to_string(),
                kind,
                field,
                value: raw.require_value()?,
            }));
        }

        Ok(None)
    }

    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            HealthEvent::MemberFault { .. } => MEMBER_FAULT,
            HealthEvent::RequestsInFlight { field, .. } => match field {
                MetricField::Average => AVERAGE_REQUESTS_IN_FLIGHT,
                MetricField::Gradient => GRADIENT_OF_REQUESTS_IN_FLIGHT,
                MetricField::SecondDerivative => SECOND_DERIVATIVE_OF_REQUESTS_IN_FLIGHT,
            },
            HealthEvent::MemberMetric { kind, field, .. } => match (kind, field) {
                (MetricKind::LoadAverage, MetricField::Average) => AVERAGE_LOAD_AVERAGE,
                (MetricKind::LoadAverage, MetricField::Gradient) => GRADIENT_OF_LOAD_AVERAGE,
                (MetricKind::LoadAverage, MetricField::SecondDerivative) => {
                    SECOND_DERIVATIVE_OF_LOAD_AVERAGE
                }
                (MetricKind::MemoryConsumption, MetricField::Average) => AVERAGE_MEMORY_CONSUMPTION,
                (MetricKind::MemoryConsumption, MetricField::Gradient) => {
                    GRADIENT_OF_MEMORY_CONSUMPTION
                }
                (MetricKind::MemoryConsumption, MetricField::SecondDerivative) => {
                    SECOND_DERIVATIVE_OF_MEMORY_CONSUMPTION
                }
            },
        }
    }
}

fn requests_in_flight_field(name: &str) -> Option<MetricField> {
    match name {
        AVERAGE_REQUESTS_IN_FLIGHT => Some(MetricField::Average),
        GRADIENT_OF_REQUESTS_IN_FLIGHT => Some(MetricField::Gradient),
        SECOND_DERIVATIVE_OF_REQUESTS_IN_FLIGHT => Some(MetricField::SecondDerivative),
        _ => None,
    }
}

fn member_metric_target(name: &str) -> Option<(MetricKind, MetricField)> {
    match name {
        AVERAGE_LOAD_AVERAGE => Some((MetricKind::LoadAverage, MetricField::Average)),
        GRADIENT_OF_LOAD_AVERAGE => Some((MetricKind::LoadAverage, MetricField::Gradient)),
        SECOND_DERIVATIVE_OF_LOAD_AVERAGE => {
            Some((MetricKind::LoadAverage, MetricField::SecondDerivative))
        }
        AVERAGE_MEMORY_CONSUMPTION => Some((MetricKind::MemoryConsumption, MetricField::Average)),
        GRADIENT_OF_MEMORY_CONSUMPTION => {
            Some((MetricKind::MemoryConsumption, MetricField::Gradient))
        }
        SECOND_DERIVATIVE_OF_MEMORY_CONSUMPTION => {
            Some((MetricKind::MemoryConsumption, MetricField::SecondDerivative))
        }
        _ => None,
    }
}
