use serde::{Deserialize, Serialize};

/// # Location
///
/// Geolocation of a charger. Coordinates are kept as the decimal-bearing text the
/// dataset ships with; the engine never does arithmetic on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude, e.g. `"52.5200"`.
    pub lat: String,
    /// Longitude, e.g. `"13.4050"`.
    pub long: String,
}

/// # Record
///
/// One reading from the dataset: a single charger and the state of its connector.
/// Records are immutable once loaded and are replayed verbatim to clients inside
/// `station_update` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Numeric charger identifier.
    #[serde(rename = "chargerId")]
    pub charger_id: i64,
    /// Where the charger stands.
    pub location: Location,
    /// Category tag, e.g. `"CCS"` or `"Type 2"`.
    pub charger_type: String,
    /// Status tag, e.g. `"Available"` or `"Charging"`.
    pub connector_status: String,
}

impl Record {
    /// Builds a record from its parts; the wire form is produced by serde.
    pub fn new(
        charger_id: i64,
        lat: impl Into<String>,
        long: impl Into<String>,
        charger_type: impl Into<String>,
        connector_status: impl Into<String>,
    ) -> Self {
        Self {
            charger_id,
            location: Location {
                lat: lat.into(),
                long: long.into(),
            },
            charger_type: charger_type.into(),
            connector_status: connector_status.into(),
        }
    }
}
