/*!
Record types shared by the correlation engine, the signal store and the
dispatch stage.

Events are ingested once and never mutated. Signals carry a single mutable
`processed` flag owned by the store. Alerts are immutable once built.
*/

pub mod alert;
pub mod error;
pub mod event;
pub mod signal;

pub use alert::Alert;
pub use error::{ParseError, ValidationError};
pub use event::{EventType, SecurityEvent, parse_timestamp};
pub use signal::{DetectionSignal, Metadata, Severity, SignalType};
