//! src/services/photo_service.rs
//!
//! PhotoService — the ingestion pipeline and the operations built on it.
//! An upload is sniffed, decoded, shrunk to the configured bounds if needed,
//! re-encoded as JPEG, hashed, written to the blob store and finally recorded
//! in the metadata store. The two stores are independent, so a failed
//! metadata insert is undone by deleting the blob again (best effort).

use crate::{
    models::photo::{Photo, PhotoPayload, ValidationCode},
    services::{
        blob_store::{BlobStore, BlobStoreError},
        hasher::{self, ContentKey},
        image_codec::{self, Image, ImageError, MIME_JPEG, MIME_PNG},
        metadata_store::{MetadataError, MetadataStore},
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, Span, debug, error, info, instrument, warn};
use uuid::Uuid;

/// Payload of the blob written by readiness checks. Not an image, so it can
/// never collide with an ingested photo.
const READINESS_PROBE: &[u8] = b"photo-store readiness probe";

/// Knobs consumed by the pipeline.
#[derive(Clone, Debug)]
pub struct IngestSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub public_scheme: String,
    pub public_host: String,
    pub jpeg_quality: u8,
}

impl IngestSettings {
    /// Public URL under which the blob for `key` is served.
    pub fn photo_url(&self, key: &ContentKey) -> String {
        format!(
            "{}://{}/photos/{}/file",
            self.public_scheme, self.public_host, key
        )
    }
}

/// Raw multipart contents of an upload, before cardinality is checked.
#[derive(Debug, Default)]
pub struct UploadParts {
    pub metadata: Vec<Bytes>,
    pub files: Vec<Bytes>,
}

impl UploadParts {
    fn into_single(mut self) -> PhotoResult<(Bytes, Bytes)> {
        match (self.metadata.len(), self.files.len()) {
            (1, 1) => Ok((self.metadata.remove(0), self.files.remove(0))),
            (metadata, files) => Err(PhotoError::PartCardinality { metadata, files }),
        }
    }
}

/// How an error is reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller mistake, with its numeric code where one is defined.
    BadInput(Option<u8>),
    NotFound,
    /// The content is already stored under another record.
    Conflict,
    UpscaleNotAllowed,
    /// Internal failure; details stay in the logs.
    Server,
}

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("unsupported file type")]
    UnsupportedType,
    #[error("malformed metadata payload: {0}")]
    MalformedPayload(String),
    #[error("expected one metadata part and one file part, got {metadata} and {files}")]
    PartCardinality { metadata: usize, files: usize },
    #[error("validation failed: {}", .0.description())]
    Invalid(ValidationCode),
    #[error("photo `{0}` not found")]
    NotFound(String),
    #[error("photo `{0}` is already stored")]
    Duplicate(String),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Blob(BlobStoreError),
    #[error(transparent)]
    Metadata(MetadataError),
    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl PhotoError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PhotoError::UnsupportedType => ErrorClass::BadInput(Some(1)),
            PhotoError::MalformedPayload(_) => ErrorClass::BadInput(Some(2)),
            PhotoError::PartCardinality { .. } => ErrorClass::BadInput(Some(3)),
            PhotoError::Invalid(code) => ErrorClass::BadInput(Some(code.code())),
            PhotoError::NotFound(_) => ErrorClass::NotFound,
            PhotoError::Duplicate(_) => ErrorClass::Conflict,
            PhotoError::Image(ImageError::UpscaleNotAllowed { .. }) => {
                ErrorClass::UpscaleNotAllowed
            }
            PhotoError::Image(ImageError::InvalidDimensions(..)) => ErrorClass::BadInput(None),
            PhotoError::Image(_)
            | PhotoError::Blob(_)
            | PhotoError::Metadata(_)
            | PhotoError::Worker(_) => ErrorClass::Server,
        }
    }
}

impl From<BlobStoreError> for PhotoError {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::NotFound(key) => PhotoError::NotFound(key),
            other => PhotoError::Blob(other),
        }
    }
}

impl From<MetadataError> for PhotoError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(key) => PhotoError::NotFound(key),
            other => PhotoError::Metadata(other),
        }
    }
}

pub type PhotoResult<T> = Result<T, PhotoError>;

/// Output of the CPU-bound half of ingestion.
struct Normalized {
    key: ContentKey,
    data: Bytes,
    width: u32,
    height: u32,
}

/// Result of probing both stores.
#[derive(Debug)]
pub struct Readiness {
    pub metadata: Result<(), String>,
    pub blobs: Result<(), String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.metadata.is_ok() && self.blobs.is_ok()
    }
}

/// Handle shared by every request. Stores are injected, never global.
#[derive(Clone)]
pub struct PhotoService {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: Arc<IngestSettings>,
}

impl PhotoService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            blobs,
            metadata,
            settings: Arc::new(settings),
        }
    }

    /// Turn an upload into a stored blob plus its metadata record.
    #[instrument(skip_all, fields(request_id = %Uuid::new_v4(), key = tracing::field::Empty))]
    pub async fn ingest(&self, parts: UploadParts) -> PhotoResult<Photo> {
        let (metadata, file) = parts.into_single()?;

        let mime = image_codec::sniff_mime(&file);
        if !matches!(mime, Some(MIME_JPEG | MIME_PNG)) {
            debug!(?mime, "rejecting upload");
            return Err(PhotoError::UnsupportedType);
        }

        let payload: PhotoPayload = serde_json::from_slice(&metadata)
            .map_err(|err| PhotoError::MalformedPayload(err.to_string()))?;
        let verdict = payload.validate();
        if !verdict.is_valid() {
            return Err(PhotoError::MalformedPayload(verdict.description().into()));
        }

        let settings = Arc::clone(&self.settings);
        let span = Span::current();
        let normalized = tokio::task::spawn_blocking(move || {
            span.in_scope(|| normalize(&file, &settings))
        })
        .await??;
        Span::current().record("key", normalized.key.as_str());

        let now = Utc::now();
        let photo = Photo {
            hash: normalized.key.to_string(),
            user_id: payload.user_id,
            name: payload.name,
            description: payload.description,
            camera: payload.camera,
            lens: payload.lens,
            focal_length: payload.focal_length,
            iso: payload.iso,
            shutter_speed: payload.shutter_speed,
            aperture: payload.aperture,
            location: payload.location,
            latitude: payload.latitude,
            longitude: payload.longitude,
            taken_at: payload.taken_at,
            privacy: payload.privacy,
            nsfw: payload.nsfw,
            width: i64::from(normalized.width),
            height: i64::from(normalized.height),
            url: self.settings.photo_url(&normalized.key),
            created_at: now,
            updated_at: now,
        };

        // Detached so a dropped request cannot stop between the blob write and
        // the metadata insert (or its compensation).
        let service = self.clone();
        tokio::spawn(
            async move { service.persist(normalized.key, normalized.data, photo).await }
                .in_current_span(),
        )
        .await?
    }

    /// Write the blob, then the record; delete the blob again if the record
    /// cannot be written.
    async fn persist(&self, key: ContentKey, data: Bytes, photo: Photo) -> PhotoResult<Photo> {
        let size = data.len();
        self.blobs.put(key.as_str(), data).await?;

        match self.metadata.insert(&photo).await {
            Ok(()) => {
                info!(size, width = photo.width, height = photo.height, "photo stored");
                Ok(photo)
            }
            Err(MetadataError::AlreadyExists(_)) => {
                // Same bytes were ingested before; the blob belongs to that record.
                info!("photo already recorded, rejecting duplicate");
                Err(PhotoError::Duplicate(key.to_string()))
            }
            Err(err) => {
                error!(error = %err, "metadata insert failed, removing blob");
                self.compensate(&key).await;
                Err(err.into())
            }
        }
    }

    async fn compensate(&self, key: &ContentKey) {
        match self.blobs.delete(key.as_str()).await {
            Ok(()) | Err(BlobStoreError::NotFound(_)) => debug!("compensated blob {}", key),
            Err(err) => warn!(error = %err, "compensation failed, blob {} may be orphaned", key),
        }
    }

    #[instrument(skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn fetch_blob(&self, key: &str) -> PhotoResult<Bytes> {
        let key = parse_key(key)?;
        Ok(self.blobs.get(key.as_str()).await?)
    }

    #[instrument(skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn fetch_metadata(&self, key: &str) -> PhotoResult<Photo> {
        let key = parse_key(key)?;
        Ok(self.metadata.get(key.as_str()).await?)
    }

    /// Replace the descriptive fields of an existing record. The content key,
    /// dimensions and blob are never touched.
    #[instrument(skip(self, payload), fields(request_id = %Uuid::new_v4()))]
    pub async fn update(&self, key: &str, payload: PhotoPayload) -> PhotoResult<Photo> {
        let key = parse_key(key)?;
        let mut photo = self.metadata.get(key.as_str()).await?;

        let verdict = payload.validate();
        if !verdict.is_valid() {
            debug!(code = verdict.code(), "update rejected");
            return Err(PhotoError::Invalid(verdict));
        }

        photo.apply(payload, Utc::now());
        self.metadata.update(&photo).await?;
        info!("photo updated");
        Ok(photo)
    }

    /// Remove the record, then its blob. A blob that is already gone is fine.
    ///
    /// Not coordinated with uploads: a re-upload of the same bytes whose blob
    /// write lands between the two removals ends up with a row and no blob.
    #[instrument(skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn delete_by_key(&self, key: &str) -> PhotoResult<()> {
        let key = parse_key(key)?;
        self.metadata.delete(key.as_str()).await?;

        match self.blobs.delete(key.as_str()).await {
            Ok(()) => {}
            Err(BlobStoreError::NotFound(_)) => debug!("blob already absent"),
            Err(err) => {
                error!(error = %err, "failed to delete blob after its record");
                return Err(PhotoError::Blob(err));
            }
        }
        info!("photo deleted");
        Ok(())
    }

    /// Render the stored blob at exactly `width`x`height`. Never enlarges.
    #[instrument(skip(self), fields(request_id = %Uuid::new_v4()))]
    pub async fn resize(&self, key: &str, width: u32, height: u32) -> PhotoResult<Bytes> {
        let key = parse_key(key)?;
        let data = self.blobs.get(key.as_str()).await?;
        let quality = self.settings.jpeg_quality;

        let span = Span::current();
        let encoded = tokio::task::spawn_blocking(move || {
            span.in_scope(|| -> PhotoResult<Vec<u8>> {
                let mut image = Image::decode(&data)?;
                image.resize(width, height)?;
                Ok(image.encode_jpeg(quality)?)
            })
        })
        .await??;
        Ok(Bytes::from(encoded))
    }

    /// Probe both stores for the readiness endpoint.
    ///
    /// The blob probe always writes the same bytes under the same key and
    /// leaves them in place, so repeated or concurrent probes touch a single
    /// shard and never race on a delete.
    pub async fn readiness(&self) -> Readiness {
        let metadata = self.metadata.ping().await.map_err(|err| err.to_string());

        let probe = Bytes::from_static(READINESS_PROBE);
        let key = hasher::hash(&probe);
        let blobs = async {
            self.blobs.put(key.as_str(), probe.clone()).await?;
            if self.blobs.get(key.as_str()).await? != probe {
                return Err(BlobStoreError::Io(std::io::Error::other(
                    "blob content mismatch",
                )));
            }
            Ok(())
        }
        .await
        .map_err(|err: BlobStoreError| err.to_string());

        Readiness { metadata, blobs }
    }
}

/// Keys that could not have come from the hasher name nothing.
fn parse_key(raw: &str) -> PhotoResult<ContentKey> {
    ContentKey::parse(raw).ok_or_else(|| PhotoError::NotFound(raw.to_string()))
}

/// Decode, shrink to the configured bounds, re-encode as JPEG and hash.
fn normalize(data: &[u8], settings: &IngestSettings) -> PhotoResult<Normalized> {
    let mut image = Image::decode(data)?;
    debug!(
        format = ?image.source_format(),
        width = image.width(),
        height = image.height(),
        "decoded upload"
    );

    if image.width() > settings.max_width || image.height() > settings.max_height {
        match image.resize_to_fit(settings.max_width, settings.max_height) {
            Ok(()) => debug!(
                width = image.width(),
                height = image.height(),
                "resized to fit"
            ),
            Err(err @ ImageError::UpscaleNotAllowed { .. }) => {
                warn!(error = %err, "fit would enlarge one side, keeping original size")
            }
            Err(err) => return Err(err.into()),
        }
    }

    let encoded = image.encode_jpeg(settings.jpeg_quality)?;
    let key = hasher::hash(&encoded);
    Ok(Normalized {
        key,
        data: Bytes::from(encoded),
        width: image.width(),
        height: image.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        blob_store::{BlobResult, FsBlobStore, MemoryBlobStore},
        image_codec::tests::fixture,
        metadata_store::{MetadataResult, SqliteMetadataStore, tests::memory_pool},
    };
    use async_trait::async_trait;
    use image::ImageFormat;
    use sqlx::SqlitePool;
    use tempfile::tempdir;

    fn settings(max_width: u32, max_height: u32) -> IngestSettings {
        IngestSettings {
            max_width,
            max_height,
            public_scheme: "https".into(),
            public_host: "photos.example.com".into(),
            jpeg_quality: 100,
        }
    }

    struct Harness {
        service: PhotoService,
        blobs: Arc<MemoryBlobStore>,
        db: Arc<SqlitePool>,
    }

    async fn harness(max_width: u32, max_height: u32) -> Harness {
        let blobs = Arc::new(MemoryBlobStore::new());
        let db = memory_pool().await;
        let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));
        let service = PhotoService::new(blobs.clone(), metadata, settings(max_width, max_height));
        Harness { service, blobs, db }
    }

    fn upload(metadata: &str, file: Vec<u8>) -> UploadParts {
        UploadParts {
            metadata: vec![Bytes::from(metadata.to_string())],
            files: vec![Bytes::from(file)],
        }
    }

    async fn row_count(db: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM photos")
            .fetch_one(db)
            .await
            .unwrap()
    }

    /// Metadata store whose writes always fail.
    struct FailingMetadataStore;

    #[async_trait]
    impl MetadataStore for FailingMetadataStore {
        async fn insert(&self, _photo: &Photo) -> MetadataResult<()> {
            Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut))
        }
        async fn get(&self, hash: &str) -> MetadataResult<Photo> {
            Err(MetadataError::NotFound(hash.to_string()))
        }
        async fn update(&self, _photo: &Photo) -> MetadataResult<()> {
            Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut))
        }
        async fn delete(&self, hash: &str) -> MetadataResult<()> {
            Err(MetadataError::NotFound(hash.to_string()))
        }
        async fn ping(&self) -> MetadataResult<()> {
            Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut))
        }
    }

    /// Blob store that accepts writes but cannot delete.
    #[derive(Default)]
    struct UndeletableBlobStore {
        inner: MemoryBlobStore,
    }

    #[async_trait]
    impl BlobStore for UndeletableBlobStore {
        async fn put(&self, key: &str, data: Bytes) -> BlobResult<()> {
            self.inner.put(key, data).await
        }
        async fn get(&self, key: &str) -> BlobResult<Bytes> {
            self.inner.get(key).await
        }
        async fn delete(&self, _key: &str) -> BlobResult<()> {
            Err(BlobStoreError::Io(std::io::Error::other("disk on fire")))
        }
    }

    #[tokio::test]
    async fn test_ingest_resizes_and_keys_by_stored_bytes() {
        let h = harness(100, 100).await;
        let original = fixture(1000, 1270, ImageFormat::Jpeg);

        let photo = h
            .service
            .ingest(upload(r#"{"name":"tall","user_id":"alice"}"#, original.clone()))
            .await
            .unwrap();

        assert!(photo.width <= 100 && photo.height <= 100);
        assert_eq!((photo.width, photo.height), (79, 100));
        assert_eq!(photo.user_id.as_deref(), Some("alice"));

        let blob = h.service.fetch_blob(&photo.hash).await.unwrap();
        assert_eq!(hasher::hash(&blob).as_str(), photo.hash);
        assert_ne!(hasher::hash(&original).as_str(), photo.hash);
        assert_eq!(
            photo.url,
            format!("https://photos.example.com/photos/{}/file", photo.hash)
        );

        let stored = h.service.fetch_metadata(&photo.hash).await.unwrap();
        assert_eq!(stored, photo);
    }

    #[tokio::test]
    async fn test_ingest_png_is_stored_as_jpeg() {
        let h = harness(1000, 1000).await;
        let photo = h
            .service
            .ingest(upload("{}", fixture(40, 30, ImageFormat::Png)))
            .await
            .unwrap();

        assert_eq!((photo.width, photo.height), (40, 30));
        let blob = h.service.fetch_blob(&photo.hash).await.unwrap();
        assert_eq!(image_codec::sniff_mime(&blob), Some(MIME_JPEG));
    }

    #[tokio::test]
    async fn test_ingest_keeps_size_when_fit_would_enlarge() {
        let h = harness(100, 100).await;
        let photo = h
            .service
            .ingest(upload("{}", fixture(300, 50, ImageFormat::Png)))
            .await
            .unwrap();

        assert_eq!((photo.width, photo.height), (300, 50));
    }

    #[tokio::test]
    async fn test_ingest_rejects_non_image_and_stores_nothing() {
        let h = harness(100, 100).await;
        let err = h
            .service
            .ingest(upload("{}", b"just some text, not a photo".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, PhotoError::UnsupportedType));
        assert_eq!(err.class(), ErrorClass::BadInput(Some(1)));
        assert!(h.blobs.is_empty().await);
        assert_eq!(row_count(&h.db).await, 0);
    }

    #[tokio::test]
    async fn test_ingest_part_cardinality() {
        let h = harness(100, 100).await;
        let file = Bytes::from(fixture(10, 10, ImageFormat::Png));

        let no_metadata = UploadParts {
            metadata: vec![],
            files: vec![file.clone()],
        };
        let two_files = UploadParts {
            metadata: vec![Bytes::from_static(b"{}")],
            files: vec![file.clone(), file],
        };

        for parts in [no_metadata, two_files] {
            let err = h.service.ingest(parts).await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::BadInput(Some(3)));
        }
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_ingest_malformed_or_invalid_metadata() {
        let h = harness(100, 100).await;

        for metadata in ["{not json", r#"{"latitude": 91.5}"#, r#"{"iso": "high"}"#] {
            let err = h
                .service
                .ingest(upload(metadata, fixture(10, 10, ImageFormat::Png)))
                .await
                .unwrap_err();
            assert_eq!(err.class(), ErrorClass::BadInput(Some(2)), "{metadata}");
        }
        assert!(h.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_metadata_insert_removes_blob() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let service = PhotoService::new(
            blobs.clone(),
            Arc::new(FailingMetadataStore),
            settings(100, 100),
        );
        let file = fixture(20, 20, ImageFormat::Png);

        let err = service.ingest(upload("{}", file)).await.unwrap_err();

        assert_eq!(err.class(), ErrorClass::Server);
        assert!(blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_compensation_failure_keeps_original_error() {
        let service = PhotoService::new(
            Arc::new(UndeletableBlobStore::default()),
            Arc::new(FailingMetadataStore),
            settings(100, 100),
        );

        let err = service
            .ingest(upload("{}", fixture(20, 20, ImageFormat::Png)))
            .await
            .unwrap_err();

        assert!(matches!(err, PhotoError::Metadata(_)));
    }

    #[tokio::test]
    async fn test_identical_uploads_converge() {
        let h = harness(100, 100).await;
        let file = fixture(50, 50, ImageFormat::Jpeg);

        let (a, b) = futures::join!(
            h.service.ingest(upload(r#"{"name":"first"}"#, file.clone())),
            h.service.ingest(upload(r#"{"name":"second"}"#, file.clone())),
        );

        let (stored, rejected) = match (a, b) {
            (Ok(photo), Err(err)) | (Err(err), Ok(photo)) => (photo, err),
            other => panic!("expected one success and one duplicate, got {other:?}"),
        };
        assert!(matches!(&rejected, PhotoError::Duplicate(key) if *key == stored.hash));
        assert_eq!(h.blobs.len().await, 1);
        assert_eq!(row_count(&h.db).await, 1);
        assert!(h.service.fetch_blob(&stored.hash).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_upload_never_returns_other_owners_record() {
        let h = harness(100, 100).await;
        let file = fixture(40, 40, ImageFormat::Png);

        let alice = h
            .service
            .ingest(upload(
                r#"{"user_id":"alice","name":"home","privacy":true,"latitude":48.85,"longitude":2.35}"#,
                file.clone(),
            ))
            .await
            .unwrap();

        let err = h
            .service
            .ingest(upload(r#"{"user_id":"bob","name":"mine"}"#, file))
            .await
            .unwrap_err();

        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(!err.to_string().contains("alice"));
        assert!(!err.to_string().contains("48.85"));

        // alice's record and blob survive untouched
        let stored = h.service.fetch_metadata(&alice.hash).await.unwrap();
        assert_eq!(stored, alice);
        assert!(h.service.fetch_blob(&alice.hash).await.is_ok());
        assert_eq!(row_count(&h.db).await, 1);
    }

    #[tokio::test]
    async fn test_update_overwrites_fields_but_not_hash() {
        let h = harness(100, 100).await;
        let photo = h
            .service
            .ingest(upload(
                r#"{"name":"old","user_id":"alice","camera":"X100V"}"#,
                fixture(30, 30, ImageFormat::Png),
            ))
            .await
            .unwrap();
        let blob_before = h.service.fetch_blob(&photo.hash).await.unwrap();

        let payload: PhotoPayload = serde_json::from_str(
            r#"{"hash":"someOtherHash","name":"new","nsfw":true,"latitude":51.5,"user_id":"mallory"}"#,
        )
        .unwrap();
        let updated = h.service.update(&photo.hash, payload).await.unwrap();

        assert_eq!(updated.hash, photo.hash);
        assert_eq!(updated.name, "new");
        assert_eq!(updated.camera, "");
        assert!(updated.nsfw);
        assert_eq!(updated.latitude, Some(51.5));
        assert_eq!(updated.user_id.as_deref(), Some("alice"));
        assert_eq!((updated.width, updated.height), (photo.width, photo.height));
        assert_eq!(updated.created_at, photo.created_at);

        assert_eq!(h.service.fetch_metadata(&photo.hash).await.unwrap(), updated);
        assert_eq!(h.service.fetch_blob(&photo.hash).await.unwrap(), blob_before);
    }

    #[tokio::test]
    async fn test_update_reports_validation_code() {
        let h = harness(100, 100).await;
        let photo = h
            .service
            .ingest(upload("{}", fixture(30, 30, ImageFormat::Png)))
            .await
            .unwrap();

        let payload = PhotoPayload {
            name: "n".repeat(300),
            latitude: Some(-95.0),
            ..Default::default()
        };
        let err = h.service.update(&photo.hash, payload).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::BadInput(Some(1)));

        let payload = PhotoPayload {
            longitude: Some(181.0),
            ..Default::default()
        };
        let err = h.service.update(&photo.hash, payload).await.unwrap_err();
        assert!(matches!(
            err,
            PhotoError::Invalid(ValidationCode::LongitudeOutOfRange)
        ));
    }

    #[tokio::test]
    async fn test_update_missing_photo() {
        let h = harness(100, 100).await;
        let key = hasher::hash(b"never uploaded");
        let err = h
            .service
            .update(key.as_str(), PhotoPayload::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_blob() {
        let h = harness(100, 100).await;
        let photo = h
            .service
            .ingest(upload("{}", fixture(30, 30, ImageFormat::Png)))
            .await
            .unwrap();

        h.service.delete_by_key(&photo.hash).await.unwrap();

        assert_eq!(
            h.service.fetch_metadata(&photo.hash).await.unwrap_err().class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            h.service.fetch_blob(&photo.hash).await.unwrap_err().class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            h.service.delete_by_key(&photo.hash).await.unwrap_err().class(),
            ErrorClass::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_blob() {
        let h = harness(100, 100).await;
        let photo = h
            .service
            .ingest(upload("{}", fixture(30, 30, ImageFormat::Png)))
            .await
            .unwrap();
        h.blobs.delete(&photo.hash).await.unwrap();

        h.service.delete_by_key(&photo.hash).await.unwrap();
        assert_eq!(row_count(&h.db).await, 0);
    }

    #[tokio::test]
    async fn test_resize_stored_photo() {
        let h = harness(1000, 1000).await;
        let photo = h
            .service
            .ingest(upload("{}", fixture(200, 100, ImageFormat::Jpeg)))
            .await
            .unwrap();

        let resized = h.service.resize(&photo.hash, 50, 50).await.unwrap();
        let decoded = Image::decode(&resized).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 50));

        let err = h.service.resize(&photo.hash, 400, 50).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::UpscaleNotAllowed);

        let missing = hasher::hash(b"missing");
        let err = h.service.resize(missing.as_str(), 10, 10).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_malformed_keys_are_not_found() {
        let h = harness(100, 100).await;
        for key in ["../etc/passwd", "short", ""] {
            assert_eq!(
                h.service.fetch_blob(key).await.unwrap_err().class(),
                ErrorClass::NotFound
            );
        }
    }

    #[tokio::test]
    async fn test_readiness() {
        let h = harness(100, 100).await;
        for _ in 0..3 {
            let ready = h.service.readiness().await;
            assert!(ready.is_ready(), "{ready:?}");
        }
        assert_eq!(h.blobs.len().await, 1);

        let broken = PhotoService::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(FailingMetadataStore),
            settings(100, 100),
        );
        assert!(!broken.readiness().await.is_ready());
    }

    #[tokio::test]
    async fn test_repeated_readiness_reuses_one_shard() {
        let dir = tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::open(dir.path()).await.unwrap());
        let metadata = Arc::new(SqliteMetadataStore::new(memory_pool().await));
        let service = PhotoService::new(blobs, metadata, settings(100, 100));

        assert!(service.readiness().await.is_ready());
        let shards = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(shards, 1);

        for _ in 0..50 {
            assert!(service.readiness().await.is_ready());
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), shards);
    }

    #[tokio::test]
    async fn test_ingest_and_delete_on_disk() {
        let dir = tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::open(dir.path()).await.unwrap());
        let db = memory_pool().await;
        let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));
        let service = PhotoService::new(blobs, metadata, settings(100, 100));

        let photo = service
            .ingest(upload(
                r#"{"name":"on disk"}"#,
                fixture(250, 125, ImageFormat::Png),
            ))
            .await
            .unwrap();
        assert_eq!((photo.width, photo.height), (100, 50));

        let path = dir
            .path()
            .join(&photo.hash[0..2])
            .join(&photo.hash[2..4])
            .join(&photo.hash);
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(hasher::hash(&on_disk).as_str(), photo.hash);
        assert_eq!(service.fetch_blob(&photo.hash).await.unwrap(), on_disk);

        service.delete_by_key(&photo.hash).await.unwrap();
        assert!(!path.exists());
        assert!(path.parent().unwrap().is_dir());
        assert_eq!(row_count(&db).await, 0);
        assert_eq!(
            service.fetch_blob(&photo.hash).await.unwrap_err().class(),
            ErrorClass::NotFound
        );
    }

    #[tokio::test]
    async fn test_compensation_removes_blob_on_disk() {
        let dir = tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::open(dir.path()).await.unwrap());
        let service = PhotoService::new(blobs, Arc::new(FailingMetadataStore), settings(100, 100));

        let err = service
            .ingest(upload("{}", fixture(20, 20, ImageFormat::Png)))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Server);

        let key = hasher::hash(
            &Image::decode(&fixture(20, 20, ImageFormat::Png))
                .unwrap()
                .encode_jpeg(100)
                .unwrap(),
        );
        let shard = dir.path().join(&key.as_str()[0..2]).join(&key.as_str()[2..4]);
        assert!(shard.is_dir());
        assert_eq!(std::fs::read_dir(&shard).unwrap().count(), 0);
    }
}
