use std::{collections::BTreeMap, fmt};

use serde::{
    de::{self, MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

const KEY_PREFIX: &str = "spot_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    Empty,
    Occupied,
}

impl SpotStatus {
    pub fn from_empty(empty: bool) -> Self {
        if empty {
            SpotStatus::Empty
        } else {
            SpotStatus::Occupied
        }
    }

    pub fn is_empty(self) -> bool {
        self == SpotStatus::Empty
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpotStatus::Empty => "empty",
            SpotStatus::Occupied => "occupied",
        }
    }
}

impl fmt::Display for SpotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire key for a spot index, e.g. `spot_3`.
pub fn spot_key(index: usize) -> String {
    format!("{KEY_PREFIX}{index}")
}

fn parse_spot_key(key: &str) -> Option<usize> {
    let index: usize = key.strip_prefix(KEY_PREFIX)?.parse().ok()?;
    // rejects `spot_+1`, `spot_01` and friends
    (spot_key(index) == key).then_some(index)
}

/// Full status of every spot at one instant, as sent to subscribers.
///
/// Encodes as a flat JSON object `{"spot_0": "empty", "spot_1": "occupied", ...}`
/// with keys in index order. Decoding accepts any key order but requires the
/// indices to cover exactly `0..n`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParkingSnapshot {
    statuses: Vec<SpotStatus>,
}

impl ParkingSnapshot {
    pub fn new(statuses: Vec<SpotStatus>) -> Self {
        Self { statuses }
    }

    /// Build from cache slots; a spot that was never classified reports as occupied.
    pub fn from_slots(slots: &[Option<SpotStatus>]) -> Self {
        Self {
            statuses: slots
                .iter()
                .map(|slot| slot.unwrap_or(SpotStatus::Occupied))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn statuses(&self) -> &[SpotStatus] {
        &self.statuses
    }

    pub fn occupied_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s == SpotStatus::Occupied)
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl Serialize for ParkingSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.statuses.len()))?;
        for (index, status) in self.statuses.iter().enumerate() {
            map.serialize_entry(&spot_key(index), status)?;
        }
        map.end()
    }
}

struct SnapshotVisitor;

impl<'de> Visitor<'de> for SnapshotVisitor {
    type Value = ParkingSnapshot;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of `spot_<index>` keys to \"empty\" or \"occupied\"")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut by_index = BTreeMap::new();
        while let Some((key, status)) = access.next_entry::<String, SpotStatus>()? {
            let Some(index) = parse_spot_key(&key) else {
                return Err(de::Error::custom(format!("unexpected key `{key}`")));
            };
            if by_index.insert(index, status).is_some() {
                return Err(de::Error::custom(format!("duplicate key `{key}`")));
            }
        }
        if let Some((missing, _)) = by_index
            .keys()
            .enumerate()
            .find(|(expected, index)| expected != *index)
        {
            return Err(de::Error::custom(format!(
                "missing key `{}`",
                spot_key(missing)
            )));
        }
        Ok(ParkingSnapshot::new(by_index.into_values().collect()))
    }
}

impl<'de> Deserialize<'de> for ParkingSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(SnapshotVisitor)
    }
}
