//! Imagery notifications and scene identity.
//!
//! A notification is a Sentinel-2 L2A STAC item, delivered either raw or
//! wrapped in an SNS envelope whose `Records[0].Sns.Message` holds the item
//! as a JSON string.

use crate::{MergeError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Asset keys that may hold the scene classification band.
const SCL_ASSET_KEYS: [&str; 2] = ["SCL", "scl"];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Records")]
    records: Vec<SnsRecord>,
}

#[derive(Debug, Deserialize)]
struct SnsRecord {
    #[serde(rename = "Sns")]
    sns: SnsMessage,
}

#[derive(Debug, Deserialize)]
struct SnsMessage {
    #[serde(rename = "Message")]
    message: String,
}

/// The subset of a STAC item the merge job reads.
#[derive(Debug, Clone, Deserialize)]
struct StacItem {
    id: String,

    #[serde(default)]
    geometry: Option<Value>,

    #[serde(default)]
    properties: HashMap<String, Value>,

    #[serde(default)]
    assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Deserialize)]
struct StacAsset {
    href: String,
}

impl StacItem {
    fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// A property that may be published as a number or a string.
    fn property_u64(&self, key: &str) -> Option<u64> {
        match self.properties.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scene identity
// ---------------------------------------------------------------------------

/// A Sentinel-2 MGRS tile such as `30TXM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MgrsTile {
    /// UTM zone, 1-60.
    pub zone: u8,
    /// Latitude band letter, `C`..=`X` without `I` and `O`.
    pub latitude_band: char,
    /// 100 km grid square, two letters.
    pub grid_square: [char; 2],
}

impl MgrsTile {
    pub fn new(zone: u8, latitude_band: char, grid_square: &str) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(MergeError::Format(format!("invalid UTM zone {}", zone)));
        }

        let band = latitude_band.to_ascii_uppercase();
        if !('C'..='X').contains(&band) || band == 'I' || band == 'O' {
            return Err(MergeError::Format(format!(
                "invalid latitude band '{}'",
                latitude_band
            )));
        }

        let square: Vec<char> = grid_square.chars().map(|c| c.to_ascii_uppercase()).collect();
        match square.as_slice() {
            [a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => Ok(Self {
                zone,
                latitude_band: band,
                grid_square: [*a, *b],
            }),
            _ => Err(MergeError::Format(format!(
                "invalid grid square '{}'",
                grid_square
            ))),
        }
    }

    /// EPSG code of the tile's UTM zone.
    pub fn utm_epsg(&self) -> u32 {
        let base = if self.latitude_band >= 'N' { 32600 } else { 32700 };
        base + u32::from(self.zone)
    }
}

impl FromStr for MgrsTile {
    type Err = MergeError;

    /// Parse `30TXM`, `T30TXM` or `1CCV`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix('T').unwrap_or(s);
        let digits = s.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 || digits > 2 || s.len() != digits + 3 {
            return Err(MergeError::Format(format!("invalid MGRS tile '{}'", s)));
        }

        let zone = s[..digits]
            .parse()
            .map_err(|_| MergeError::Format(format!("invalid MGRS tile '{}'", s)))?;
        let mut rest = s[digits..].chars();
        let band = rest.next().unwrap_or_default();
        Self::new(zone, band, rest.as_str())
    }
}

impl std::fmt::Display for MgrsTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}{}{}{}",
            self.zone, self.latitude_band, self.grid_square[0], self.grid_square[1]
        )
    }
}

/// Acquisition identity of a scene, rendered as `T30TXM_20240101`.
///
/// Output artifacts are keyed by this value, so repeated notifications for
/// the same acquisition land on the same paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId {
    pub tile: MgrsTile,
    pub date: NaiveDate,
}

impl SceneId {
    pub fn new(tile: MgrsTile, date: NaiveDate) -> Self {
        Self { tile, date }
    }
}

impl FromStr for SceneId {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        let (tile, date) = s
            .split_once('_')
            .ok_or_else(|| MergeError::Format(format!("invalid scene id '{}'", s)))?;
        let date = NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|e| MergeError::Format(format!("invalid scene date '{}': {}", date, e)))?;
        Ok(Self::new(tile.parse()?, date))
    }
}

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}_{}", self.tile, self.date.format("%Y%m%d"))
    }
}

// ---------------------------------------------------------------------------
// Source scene
// ---------------------------------------------------------------------------

/// Everything the merge job needs from one notification.
#[derive(Debug, Clone)]
pub struct SourceScene {
    /// STAC item id, e.g. `S2B_30TXM_20210103_0_L2A`.
    pub item_id: String,
    pub scene_id: SceneId,
    /// Href of the SCL asset.
    pub source_href: String,
    /// Footprint geometry, WGS84 GeoJSON.
    pub footprint: Option<Value>,
    pub cloud_cover: Option<f64>,
    pub platform: Option<String>,
    pub product_id: Option<String>,
    /// The item as received, echoed into the summary sidecar.
    pub item: Value,
}

impl SourceScene {
    /// Parse a notification payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    /// Parse a notification that has already been decoded as JSON.
    pub fn from_value(value: Value) -> Result<Self> {
        let item = if value.get("Records").is_some() {
            let envelope: SnsEnvelope = serde_json::from_value(value)?;
            let record = envelope
                .records
                .into_iter()
                .next()
                .ok_or_else(|| MergeError::Format("SNS envelope has no records".into()))?;
            serde_json::from_str(&record.sns.message)?
        } else {
            value
        };

        let stac: StacItem = serde_json::from_value(item.clone())?;

        let source_href = SCL_ASSET_KEYS
            .iter()
            .find_map(|key| stac.assets.get(*key))
            .map(|asset| asset.href.clone())
            .ok_or_else(|| {
                MergeError::Format(format!("item {} has no SCL asset", stac.id))
            })?;

        let scene_id = SceneId::new(tile_of(&stac)?, acquisition_date(&stac)?);

        Ok(Self {
            scene_id,
            source_href,
            footprint: stac.geometry.clone().filter(|g| !g.is_null()),
            cloud_cover: stac.properties.get("eo:cloud_cover").and_then(Value::as_f64),
            platform: stac.property_str("platform").map(str::to_string),
            product_id: stac
                .property_str("sentinel:product_id")
                .or_else(|| stac.property_str("s2:product_uri"))
                .map(str::to_string),
            item_id: stac.id,
            item,
        })
    }
}

/// Tile code from the `sentinel:*` or `mgrs:*` properties, else from the item id.
fn tile_of(item: &StacItem) -> Result<MgrsTile> {
    for prefix in ["sentinel", "mgrs"] {
        let zone = item.property_u64(&format!("{}:utm_zone", prefix));
        let band = item.property_str(&format!("{}:latitude_band", prefix));
        let square = item.property_str(&format!("{}:grid_square", prefix));

        if let (Some(zone), Some(band), Some(square)) = (zone, band, square) {
            let zone = u8::try_from(zone)
                .map_err(|_| MergeError::Format(format!("invalid UTM zone {}", zone)))?;
            let band = band.chars().next().unwrap_or_default();
            return MgrsTile::new(zone, band, square);
        }
    }

    // Item ids look like S2B_30TXM_20210103_0_L2A
    item.id
        .split('_')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| MergeError::Format(format!("item {} has no tile code", item.id)))
}

/// Acquisition date from `properties.datetime`, else from the item id.
fn acquisition_date(item: &StacItem) -> Result<NaiveDate> {
    if let Some(datetime) = item.property_str("datetime") {
        return DateTime::parse_from_rfc3339(datetime)
            .map(|dt| dt.with_timezone(&Utc).date_naive())
            .map_err(|e| MergeError::Format(format!("invalid datetime '{}': {}", datetime, e)));
    }

    item.id
        .split('_')
        .nth(2)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok())
        .ok_or_else(|| MergeError::Format(format!("item {} has no acquisition date", item.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> Value {
        json!({
            "type": "Feature",
            "id": "S2B_30TXM_20210103_0_L2A",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-1.8, 42.3], [-0.5, 42.3], [-0.5, 43.3], [-1.8, 43.3], [-1.8, 42.3]]]
            },
            "properties": {
                "datetime": "2021-01-03T11:07:55Z",
                "platform": "sentinel-2b",
                "eo:cloud_cover": 12.5,
                "sentinel:utm_zone": 30,
                "sentinel:latitude_band": "T",
                "sentinel:grid_square": "XM",
                "sentinel:product_id": "S2B_MSIL2A_20210103T110359_N0214_R094_T30TXM_20210103T123142"
            },
            "assets": {
                "SCL": { "href": "https://sentinel-cogs.s3.us-west-2.amazonaws.com/sentinel-s2-l2a-cogs/30/T/XM/2021/1/S2B_30TXM_20210103_0_L2A/SCL.tif" }
            }
        })
    }

    #[test]
    fn test_raw_item() {
        let scene = SourceScene::from_value(item()).unwrap();
        assert_eq!(scene.item_id, "S2B_30TXM_20210103_0_L2A");
        assert_eq!(scene.scene_id.to_string(), "T30TXM_20210103");
        assert!(scene.source_href.ends_with("/SCL.tif"));
        assert_eq!(scene.cloud_cover, Some(12.5));
        assert_eq!(scene.platform.as_deref(), Some("sentinel-2b"));
        assert!(scene.footprint.is_some());
        assert_eq!(scene.item, item());
    }

    #[test]
    fn test_sns_envelope() {
        let envelope = json!({
            "Records": [{
                "EventSource": "aws:sns",
                "Sns": { "Type": "Notification", "Message": item().to_string() }
            }]
        });

        let scene = SourceScene::from_json(&envelope.to_string()).unwrap();
        assert_eq!(scene.scene_id.to_string(), "T30TXM_20210103");
        assert_eq!(scene.item["id"], "S2B_30TXM_20210103_0_L2A");
    }

    #[test]
    fn test_empty_envelope() {
        let err = SourceScene::from_json(r#"{"Records": []}"#).unwrap_err();
        assert!(matches!(err, MergeError::Format(_)));
    }

    #[test]
    fn test_tile_and_date_from_item_id() {
        let mut raw = item();
        raw["properties"] = json!({});
        let scene = SourceScene::from_value(raw).unwrap();
        assert_eq!(scene.scene_id.to_string(), "T30TXM_20210103");
    }

    #[test]
    fn test_date_taken_in_utc() {
        let mut raw = item();
        raw["properties"]["datetime"] = json!("2021-01-03T23:30:00-02:00");
        let scene = SourceScene::from_value(raw).unwrap();
        assert_eq!(scene.scene_id.to_string(), "T30TXM_20210104");

        let mut raw = item();
        raw["properties"]["datetime"] = json!("2021-01-04T00:30:00+01:00");
        let scene = SourceScene::from_value(raw).unwrap();
        assert_eq!(scene.scene_id.to_string(), "T30TXM_20210103");
    }

    #[test]
    fn test_mgrs_properties() {
        let mut raw = item();
        raw["id"] = json!("S2A_MSIL2A_20240101T105441_R051_T30TXM_20240101T134512");
        raw["properties"] = json!({
            "datetime": "2024-01-01T10:57:12.024000Z",
            "mgrs:utm_zone": 30,
            "mgrs:latitude_band": "T",
            "mgrs:grid_square": "XM"
        });
        raw["assets"] = json!({ "scl": { "href": "/data/scl.tif" } });

        let scene = SourceScene::from_value(raw).unwrap();
        assert_eq!(scene.scene_id.to_string(), "T30TXM_20240101");
        assert_eq!(scene.source_href, "/data/scl.tif");
    }

    #[test]
    fn test_missing_scl_asset() {
        let mut raw = item();
        raw["assets"] = json!({ "B04": { "href": "B04.tif" } });
        let err = SourceScene::from_value(raw).unwrap_err();
        assert!(matches!(err, MergeError::Format(_)));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SourceScene::from_json("{not json"),
            Err(MergeError::Format(_))
        ));
    }

    #[test]
    fn test_scene_id_parse() {
        let id: SceneId = "T30TXM_20240101".parse().unwrap();
        assert_eq!(id.tile.zone, 30);
        assert_eq!(id.tile.latitude_band, 'T');
        assert_eq!(id.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(id.to_string(), "T30TXM_20240101");

        let southern: SceneId = "T1CCV_20240101".parse().unwrap();
        assert_eq!(southern.to_string(), "T01CCV_20240101");
        assert_eq!(southern.tile.utm_epsg(), 32701);

        assert!("T30IXM_20240101".parse::<SceneId>().is_err());
        assert!("T30TXM_2024".parse::<SceneId>().is_err());
        assert!("30TXM".parse::<SceneId>().is_err());
    }
}
