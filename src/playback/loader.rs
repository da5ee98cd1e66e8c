// Resource loading
// Fetches the selected resource and decodes it into a shared buffer off the
// controller's thread. Results are tagged with a generation so a slow load
// for a resource the user already switched away from is discarded.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::engine::{ControllerEvent, EventSender};
use super::error::PlaybackError;
use super::segment::ResourceId;
use crate::audio::{AudioDecoder, DecodeError, DecodedBuffer};

/// Where resource bytes come from
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn fetch(&self, id: &ResourceId) -> Result<Bytes, PlaybackError>;
}

/// Fetches `{base_url}/{id}` over HTTP
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, id: &ResourceId) -> String {
        format!("{}/{}", self.base_url, id)
    }
}

#[async_trait]
impl ResourceSource for HttpSource {
    async fn fetch(&self, id: &ResourceId) -> Result<Bytes, PlaybackError> {
        let url = self.url_for(id);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlaybackError::fetch(id, e))?;
        response.bytes().await.map_err(|e| PlaybackError::fetch(id, e))
    }
}

/// Reads resources from a local directory
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ResourceSource for FileSource {
    async fn fetch(&self, id: &ResourceId) -> Result<Bytes, PlaybackError> {
        let path = self.root.join(id.as_str());
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| PlaybackError::fetch(id, format!("{}: {}", path.display(), e)))
    }
}

/// Serves resources held in memory
#[derive(Default, Clone)]
pub struct MemorySource {
    resources: HashMap<ResourceId, Bytes>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<ResourceId>, bytes: impl Into<Bytes>) {
        self.resources.insert(id.into(), bytes.into());
    }

    pub fn with(mut self, id: impl Into<ResourceId>, bytes: impl Into<Bytes>) -> Self {
        self.insert(id, bytes);
        self
    }
}

#[async_trait]
impl ResourceSource for MemorySource {
    async fn fetch(&self, id: &ResourceId) -> Result<Bytes, PlaybackError> {
        self.resources
            .get(id)
            .cloned()
            .ok_or_else(|| PlaybackError::fetch(id, "not found"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// The selected resource and its decoded buffer, if any
#[derive(Debug, Clone)]
pub struct AudioResource {
    pub id: ResourceId,
    pub status: DecodeStatus,
    pub buffer: Option<Arc<DecodedBuffer>>,
    pub failure: Option<PlaybackError>,
}

impl AudioResource {
    fn loading(id: ResourceId) -> Self {
        Self {
            id,
            status: DecodeStatus::Loading,
            buffer: None,
            failure: None,
        }
    }
}

/// Fetch and decode the whole resource
pub async fn fetch_and_decode(
    source: &dyn ResourceSource,
    id: &ResourceId,
) -> Result<DecodedBuffer, PlaybackError> {
    let bytes = source.fetch(id).await?;
    let hint = id.extension().map(str::to_owned);

    let buffer = tokio::task::spawn_blocking(move || {
        AudioDecoder::from_bytes(bytes, hint.as_deref())?.decode_all()
    })
    .await
    .map_err(|e| DecodeError::Worker(e.to_string()))??;

    Ok(buffer)
}

pub struct ResourceLoader {
    source: Arc<dyn ResourceSource>,
    events: EventSender,
    resource: Option<AudioResource>,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ResourceLoader {
    pub fn new(source: Arc<dyn ResourceSource>, events: EventSender) -> Self {
        Self {
            source,
            events,
            resource: None,
            generation: 0,
            task: None,
        }
    }

    /// Start loading `id`, abandoning any load still in flight.
    /// Must be called from within a tokio runtime.
    pub fn load(&mut self, id: ResourceId) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        self.resource = Some(AudioResource::loading(id.clone()));

        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        info!("Loading resource {} (generation {})", id, generation);

        self.task = Some(tokio::spawn(async move {
            let result = fetch_and_decode(source.as_ref(), &id).await.map(Arc::new);
            let _ = events.send(ControllerEvent::Loaded { generation, result });
        }));

        generation
    }

    /// Apply a finished load. Returns false for a stale generation.
    pub fn complete(
        &mut self,
        generation: u64,
        result: Result<Arc<DecodedBuffer>, PlaybackError>,
    ) -> bool {
        if generation != self.generation {
            debug!(
                "Discarding load result of generation {} (current {})",
                generation, self.generation
            );
            return false;
        }
        let Some(resource) = self.resource.as_mut() else {
            return false;
        };

        self.task = None;
        match result {
            Ok(buffer) => {
                info!(
                    "Resource {} decoded: {:.3}s, {} Hz, {} channels",
                    resource.id,
                    buffer.duration(),
                    buffer.sample_rate(),
                    buffer.channels()
                );
                resource.status = DecodeStatus::Ready;
                resource.buffer = Some(buffer);
                resource.failure = None;
            }
            Err(e) => {
                error!("Failed to load resource {}: {}", resource.id, e);
                resource.status = DecodeStatus::Failed;
                resource.buffer = None;
                resource.failure = Some(e);
            }
        }
        true
    }

    pub fn resource(&self) -> Option<&AudioResource> {
        self.resource.as_ref()
    }

    /// The decoded buffer, only when decoding succeeded
    pub fn ready_buffer(&self) -> Option<Arc<DecodedBuffer>> {
        self.resource
            .as_ref()
            .filter(|r| r.status == DecodeStatus::Ready)
            .and_then(|r| r.buffer.clone())
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forget the current resource
    pub fn unload(&mut self) {
        self.cancel();
        self.generation += 1;
        self.resource = None;
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ResourceLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wav_bytes;
    use tokio::sync::mpsc;

    async fn next_loaded(
        rx: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> (u64, Result<Arc<DecodedBuffer>, PlaybackError>) {
        loop {
            match rx.recv().await {
                Some(ControllerEvent::Loaded { generation, result }) => return (generation, result),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_load_decodes_into_buffer() {
        let source = MemorySource::new().with("a.wav", wav_bytes(8000, 1, 2.0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut loader = ResourceLoader::new(Arc::new(source), tx);

        let generation = loader.load(ResourceId::from("a.wav"));
        assert_eq!(loader.resource().unwrap().status, DecodeStatus::Loading);
        assert!(loader.ready_buffer().is_none());

        let (got, result) = next_loaded(&mut rx).await;
        assert_eq!(got, generation);
        assert!(loader.complete(got, result));

        let buffer = loader.ready_buffer().unwrap();
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.frames(), 16000);
    }

    #[tokio::test]
    async fn test_missing_resource_fails() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut loader = ResourceLoader::new(Arc::new(MemorySource::new()), tx);
        loader.load(ResourceId::from("missing.mp3"));

        let (generation, result) = next_loaded(&mut rx).await;
        assert!(matches!(result, Err(PlaybackError::ResourceFetch { .. })));
        loader.complete(generation, result);
        assert_eq!(loader.resource().unwrap().status, DecodeStatus::Failed);
        assert!(loader.ready_buffer().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_bytes_fail() {
        let source = MemorySource::new().with("junk.mp3", Bytes::from_static(b"definitely not audio"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut loader = ResourceLoader::new(Arc::new(source), tx);
        loader.load(ResourceId::from("junk.mp3"));

        let (generation, result) = next_loaded(&mut rx).await;
        assert!(matches!(result, Err(PlaybackError::Decode(_))));
        loader.complete(generation, result);
        assert_eq!(loader.resource().unwrap().status, DecodeStatus::Failed);
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let source = MemorySource::new()
            .with("a.wav", wav_bytes(8000, 1, 1.0))
            .with("b.wav", wav_bytes(8000, 1, 3.0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut loader = ResourceLoader::new(Arc::new(source.clone()), tx);

        let first = loader.load(ResourceId::from("a.wav"));
        let second = loader.load(ResourceId::from("b.wav"));
        assert_ne!(first, second);

        let stale = fetch_and_decode(&source, &ResourceId::from("a.wav")).await.map(Arc::new);
        assert!(!loader.complete(first, stale));
        assert_eq!(loader.resource().unwrap().id, ResourceId::from("b.wav"));
        assert_eq!(loader.resource().unwrap().status, DecodeStatus::Loading);
    }

    #[test]
    fn test_http_url() {
        let source = HttpSource::new("http://localhost:8000/lc/audio/");
        assert_eq!(
            source.url_for(&ResourceId::from("17")),
            "http://localhost:8000/lc/audio/17"
        );
    }

    #[tokio::test]
    async fn test_file_source_reads_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.wav"), wav_bytes(8000, 2, 0.5)).unwrap();
        let source = FileSource::new(dir.path());

        let bytes = source.fetch(&ResourceId::from("clip.wav")).await.unwrap();
        assert!(bytes.starts_with(b"RIFF"));
        assert!(source.fetch(&ResourceId::from("nope.wav")).await.is_err());
    }
}
