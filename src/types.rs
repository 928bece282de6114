use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime};
use image::ImageReader;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::io::Cursor;

pub const PLACEHOLDER_IMAGE: &str = "/default-image.png";
/// Shown when the plate text is unknown or could not be fetched.
pub const PLACEHOLDER_LICENSE_TEXT: &str = "XXXX-XXXX";

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VehicleRecord {
    pub id: u64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(default, deserialize_with = "deserialize_speed")]
    pub speed: f64,
    /// Labels in backend order; a label may repeat.
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub license_base64: Option<String>,
    #[serde(default)]
    pub license_text: Option<String>,
}

impl VehicleRecord {
    pub fn image(&self) -> Media<'_> {
        Media::from_option(&self.image_base64)
    }

    pub fn license_image(&self) -> Media<'_> {
        Media::from_option(&self.license_base64)
    }

    pub fn license_text(&self) -> &str {
        match self.license_text.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => PLACEHOLDER_LICENSE_TEXT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Media<'a> {
    Encoded(&'a str),
    Placeholder,
}

impl<'a> Media<'a> {
    fn from_option(value: &'a Option<String>) -> Self {
        match value.as_deref() {
            Some(encoded) if !encoded.is_empty() => Media::Encoded(encoded),
            _ => Media::Placeholder,
        }
    }

    pub fn src(&self) -> String {
        match self {
            Media::Encoded(encoded) => format!("data:image/jpeg;base64,{}", encoded),
            Media::Placeholder => PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// Parses a `YYYY-MM-DD` filter bound; blank input means no bound.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).ok_or_else(|| de::Error::custom(format!("bad timestamp {:?}", s)))
}

fn deserialize_speed<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionLine {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl DetectionLine {
    pub const FIELDS: [&'static str; 4] = ["x1", "y1", "x2", "y2"];

    pub fn field_mut(&mut self, name: &str) -> Option<&mut i32> {
        match name {
            "x1" => Some(&mut self.x1),
            "y1" => Some(&mut self.y1),
            "x2" => Some(&mut self.x2),
            "y2" => Some(&mut self.y2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionPolygon {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub x3: i32,
    pub y3: i32,
    pub x4: i32,
    pub y4: i32,
}

impl DetectionPolygon {
    pub const FIELDS: [&'static str; 8] = ["x1", "y1", "x2", "y2", "x3", "y3", "x4", "y4"];

    pub fn vertices(&self) -> [(i32, i32); 4] {
        [
            (self.x1, self.y1),
            (self.x2, self.y2),
            (self.x3, self.y3),
            (self.x4, self.y4),
        ]
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut i32> {
        match name {
            "x1" => Some(&mut self.x1),
            "y1" => Some(&mut self.y1),
            "x2" => Some(&mut self.x2),
            "y2" => Some(&mut self.y2),
            "x3" => Some(&mut self.x3),
            "y3" => Some(&mut self.y3),
            "x4" => Some(&mut self.x4),
            "y4" => Some(&mut self.y4),
            _ => None,
        }
    }
}

/// Serialized exactly as the backend expects: `{"speed_limit": 60}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedLimit {
    pub speed_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Frame {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn decode(&self) -> Result<Vec<u8>, failure::Error> {
        Ok(STANDARD.decode(&self.payload)?)
    }

    pub fn dimensions(&self) -> Result<(u32, u32), failure::Error> {
        let data = self.decode()?;
        Ok(ImageReader::new(Cursor::new(data))
            .with_guessed_format()?
            .into_dimensions()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use serde_json::json;

    #[test]
    fn parses_backend_record() {
        let record: VehicleRecord = serde_json::from_value(json!({
            "id": 7,
            "timestamp": "2024-01-01 10:00:00",
            "speed": null,
            "violations": ["Overspeeding", "Overspeeding"],
            "image_base64": null,
            "license_base64": "abcd",
        }))
        .unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.speed, 0.0);
        assert_eq!(record.violations.len(), 2);
        assert_eq!(record.image(), Media::Placeholder);
        assert_eq!(record.license_image(), Media::Encoded("abcd"));
        assert_eq!(record.license_text(), PLACEHOLDER_LICENSE_TEXT);
        assert_eq!(record.image().src(), PLACEHOLDER_IMAGE);
    }

    #[test]
    fn accepts_both_timestamp_styles() {
        let a = parse_timestamp("2024-01-01 10:00:00").unwrap();
        let b = parse_timestamp("2024-01-01T10:00:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("2024-01-01T10:00:00.250").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2024-01-02"), NaiveDate::from_ymd_opt(2024, 1, 2));
    }

    #[test]
    fn rejects_record_with_bad_timestamp() {
        let result = serde_json::from_value::<VehicleRecord>(json!({
            "id": 1,
            "timestamp": "01/01/2024",
            "violations": [],
        }));
        assert!(result.is_err());
    }

    #[test]
    fn speed_limit_wire_shape() {
        let value = serde_json::to_value(SpeedLimit { speed_limit: 60 }).unwrap();
        assert_eq!(value, json!({ "speed_limit": 60 }));
    }

    #[test]
    fn polygon_vertices_keep_entry_order() {
        let polygon = DetectionPolygon {
            x1: 1,
            y1: 2,
            x2: 3,
            y2: 4,
            x3: 5,
            y3: 6,
            x4: 7,
            y4: 8,
        };
        assert_eq!(polygon.vertices(), [(1, 2), (3, 4), (5, 6), (7, 8)]);
    }

    #[test]
    fn frame_dimensions_from_encoded_png() {
        let mut png = Vec::new();
        RgbImage::new(4, 3)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let frame = Frame::new(STANDARD.encode(&png));
        assert_eq!(frame.dimensions().unwrap(), (4, 3));
        assert!(Frame::new("not base64!").decode().is_err());
    }
}
