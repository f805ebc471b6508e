//! Photo metadata records and the payload callers use to describe them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upper bound, in characters, for the short descriptive text fields.
pub const MAX_TEXT_LEN: usize = 255;

/// A stored photo, keyed by the content hash of its blob.
///
/// The blob itself lives in the blob store; this row only references it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Photo {
    /// Content key of the stored JPEG. Never changes after ingestion.
    pub hash: String,

    /// Reference to the owning user, if the caller supplied one.
    pub user_id: Option<String>,

    pub name: String,
    pub description: String,
    pub camera: String,
    pub lens: String,
    pub focal_length: String,
    pub iso: Option<i64>,
    pub shutter_speed: String,
    pub aperture: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// When the photo was captured.
    pub taken_at: Option<DateTime<Utc>>,

    pub privacy: bool,
    pub nsfw: bool,

    /// Pixel dimensions of the stored blob (after any ingest resize).
    pub width: i64,
    pub height: i64,

    /// Public retrieval URL of the blob.
    pub url: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied description of a photo, used both at ingestion and for
/// updates. A `hash` field in the JSON is accepted and ignored.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PhotoPayload {
    pub user_id: Option<String>,
    pub name: String,
    pub description: String,
    pub camera: String,
    pub lens: String,
    pub focal_length: String,
    pub iso: Option<i64>,
    pub shutter_speed: String,
    pub aperture: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub taken_at: Option<DateTime<Utc>>,
    pub privacy: bool,
    pub nsfw: bool,
}

/// Outcome of validating a [`PhotoPayload`]. The discriminants are part of
/// the public API and must not be renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ValidationCode {
    Valid = 0,
    NameTooLong = 1,
    CameraTooLong = 2,
    LensTooLong = 3,
    ShutterSpeedTooLong = 4,
    LocationTooLong = 5,
    LatitudeOutOfRange = 6,
    LongitudeOutOfRange = 7,
    TakenInFuture = 8,
}

impl ValidationCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_valid(self) -> bool {
        self == ValidationCode::Valid
    }

    pub fn description(self) -> &'static str {
        match self {
            ValidationCode::Valid => "valid",
            ValidationCode::NameTooLong => "name exceeds 255 characters",
            ValidationCode::CameraTooLong => "camera exceeds 255 characters",
            ValidationCode::LensTooLong => "lens exceeds 255 characters",
            ValidationCode::ShutterSpeedTooLong => "shutter speed exceeds 255 characters",
            ValidationCode::LocationTooLong => "location exceeds 255 characters",
            ValidationCode::LatitudeOutOfRange => "latitude must be between -90 and 90",
            ValidationCode::LongitudeOutOfRange => "longitude must be between -180 and 180",
            ValidationCode::TakenInFuture => "capture time is in the future",
        }
    }
}

fn too_long(value: &str) -> bool {
    value.chars().count() > MAX_TEXT_LEN
}

impl PhotoPayload {
    /// Check the payload against `now`, stopping at the first violation in
    /// code order.
    pub fn validate_at(&self, now: DateTime<Utc>) -> ValidationCode {
        if too_long(&self.name) {
            return ValidationCode::NameTooLong;
        }
        if too_long(&self.camera) {
            return ValidationCode::CameraTooLong;
        }
        if too_long(&self.lens) {
            return ValidationCode::LensTooLong;
        }
        if too_long(&self.shutter_speed) {
            return ValidationCode::ShutterSpeedTooLong;
        }
        if too_long(&self.location) {
            return ValidationCode::LocationTooLong;
        }
        // NaN fails the range check too
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return ValidationCode::LatitudeOutOfRange;
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return ValidationCode::LongitudeOutOfRange;
            }
        }
        if let Some(taken_at) = self.taken_at {
            if taken_at > now {
                return ValidationCode::TakenInFuture;
            }
        }
        ValidationCode::Valid
    }

    pub fn validate(&self) -> ValidationCode {
        self.validate_at(Utc::now())
    }
}

impl Photo {
    /// Overwrite every mutable descriptive field from `payload`. The hash,
    /// dimensions, URL, owner and creation time are left alone.
    pub fn apply(&mut self, payload: PhotoPayload, now: DateTime<Utc>) {
        self.name = payload.name;
        self.description = payload.description;
        self.camera = payload.camera;
        self.lens = payload.lens;
        self.focal_length = payload.focal_length;
        self.iso = payload.iso;
        self.shutter_speed = payload.shutter_speed;
        self.aperture = payload.aperture;
        self.location = payload.location;
        self.privacy = payload.privacy;
        self.latitude = payload.latitude;
        self.longitude = payload.longitude;
        self.taken_at = payload.taken_at;
        self.nsfw = payload.nsfw;
        self.updated_at = now;
    }
}
