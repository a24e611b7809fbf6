//! Headless collaborators used by the command line stage.

use std::{
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use avatar_stage_core::{
    analysis::AmplitudeAnalyser, Archive, ArchiveReader, AssetFetcher, AudioBackend,
    AudioDecoder, AudioSource, AvatarStageError, BufferAnalyser, Capability, DecodedAudio,
    ExtendedBackend, ExtendedModuleLoader, MeshLoader, MeshScene, ObjectUrlRegistry,
    PoseMetadata, ResourceKind, Result, UiNotifier,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use zip::{result::ZipError, ZipArchive};

/// Reads assets relative to a root directory.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetFetcher for FsFetcher {
    async fn fetch(&self, asset_id: &str) -> Result<Vec<u8>> {
        let path = self.root.join(asset_id);
        tokio::fs::read(&path).await.map_err(|err| {
            AvatarStageError::msg(format!("cannot read {}: {err}", path.display()))
        })
    }
}

/// Opens ZIP bundles such as `.gvrm` avatars.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiveReader;

struct ZipBundle {
    archive: ZipArchive<Cursor<Vec<u8>>>,
}

impl ArchiveReader for ZipArchiveReader {
    fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn Archive>> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| AvatarStageError::msg(format!("invalid zip archive: {err}")))?;
        Ok(Box::new(ZipBundle { archive }))
    }
}

impl Archive for ZipBundle {
    fn entry(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(AvatarStageError::msg(format!("cannot read `{name}`: {err}"))),
        };
        let mut body = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut body)?;
        Ok(Some(body))
    }
}

/// Loads glTF and binary glTF avatars from object URLs and reads their
/// humanoid metadata.
#[derive(Debug, Clone)]
pub struct GlbLoader {
    urls: ObjectUrlRegistry,
}

impl GlbLoader {
    pub fn new(urls: ObjectUrlRegistry) -> Self {
        Self { urls }
    }
}

#[async_trait]
impl MeshLoader for GlbLoader {
    async fn load(&self, url: &str) -> Result<MeshScene> {
        let bytes = self
            .urls
            .resolve(url)
            .ok_or_else(|| AvatarStageError::msg(format!("object url {url} is not live")))?;
        parse_glb(&bytes).map_err(|err| AvatarStageError::decode(url, err))
    }
}

fn parse_glb(bytes: &[u8]) -> Result<MeshScene> {
    let gltf = gltf::Gltf::from_slice(bytes)
        .map_err(|err| AvatarStageError::msg(format!("invalid glTF: {err}")))?;

    let name = gltf
        .scenes()
        .next()
        .and_then(|scene| scene.name().map(str::to_string))
        .or_else(|| gltf.as_json().asset.generator.clone())
        .unwrap_or_else(|| "avatar".to_string());

    let pose = match gltf.extension_value("VRMC_vrm") {
        Some(vrm) => Some(vrm1_pose(vrm)?),
        None => gltf.extension_value("VRM").map(vrm0_pose).transpose()?,
    };

    Ok(MeshScene {
        name,
        node_count: gltf.nodes().count(),
        mesh_count: gltf.meshes().count(),
        pose,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VrmExtension<B> {
    spec_version: Option<String>,
    #[serde(default)]
    humanoid: VrmHumanoid<B>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VrmHumanoid<B> {
    #[serde(default)]
    human_bones: B,
}

/// VRM 1.0 keys human bones by name.
fn vrm1_pose(value: &Value) -> Result<PoseMetadata> {
    let vrm: VrmExtension<Map<String, Value>> = serde_json::from_value(value.clone())?;
    Ok(PoseMetadata {
        spec_version: vrm.spec_version.unwrap_or_else(|| "1.0".to_string()),
        bone_count: vrm.humanoid.human_bones.len(),
    })
}

/// VRM 0.x lists human bones as an array.
fn vrm0_pose(value: &Value) -> Result<PoseMetadata> {
    let vrm: VrmExtension<Vec<Value>> = serde_json::from_value(value.clone())?;
    Ok(PoseMetadata {
        spec_version: vrm.spec_version.unwrap_or_else(|| "0.0".to_string()),
        bone_count: vrm.humanoid.human_bones.len(),
    })
}

/// Extended-backend loader for hosts without a splat renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSplatModule;

#[async_trait]
impl ExtendedModuleLoader for UnavailableSplatModule {
    async fn import(&self) -> Result<Arc<dyn ExtendedBackend>> {
        Err(AvatarStageError::msg(
            "gaussian splat renderer is not available in headless mode",
        ))
    }
}

/// WAV decoding from disk with a silent, always-resumable output.
#[derive(Debug, Clone)]
pub struct WavAudio {
    root: PathBuf,
}

impl WavAudio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, url: &str) -> PathBuf {
        self.root.join(Path::new(url))
    }
}

#[async_trait]
impl AudioDecoder for WavAudio {
    async fn decode(&self, url: &str) -> Result<DecodedAudio> {
        let bytes = tokio::fs::read(self.path(url))
            .await
            .map_err(|err| AvatarStageError::decode(url, err))?;
        decode_wav(bytes).map_err(|err| AvatarStageError::decode(url, err))
    }
}

fn decode_wav(bytes: Vec<u8>) -> std::result::Result<DecodedAudio, hound::Error> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(DecodedAudio::new(spec.sample_rate, samples))
}

#[async_trait]
impl AudioBackend for WavAudio {
    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    fn create_source(&self) -> Box<dyn AudioSource> {
        Box::<HeadlessSource>::default()
    }

    fn create_analyser(&self, source: &dyn AudioSource, fft_size: usize) -> Box<dyn AmplitudeAnalyser> {
        match source.buffer() {
            Some(buffer) => Box::new(BufferAnalyser::new(
                buffer,
                source.volume(),
                source.is_looping(),
                fft_size,
            )),
            None => Box::new(Silence),
        }
    }
}

struct Silence;

impl AmplitudeAnalyser for Silence {
    fn average_frequency(&mut self) -> f32 {
        0.0
    }
}

/// Output source that tracks playback state without producing sound.
#[derive(Debug)]
pub struct HeadlessSource {
    buffer: Option<Arc<DecodedAudio>>,
    looping: bool,
    volume: f32,
    playing: bool,
}

impl Default for HeadlessSource {
    fn default() -> Self {
        Self {
            buffer: None,
            looping: false,
            volume: 1.0,
            playing: false,
        }
    }
}

impl AudioSource for HeadlessSource {
    fn set_buffer(&mut self, buffer: Arc<DecodedAudio>) {
        self.buffer = Some(buffer);
    }

    fn buffer(&self) -> Option<Arc<DecodedAudio>> {
        self.buffer.clone()
    }

    fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn is_looping(&self) -> bool {
        self.looping
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn play(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            return Err(AvatarStageError::msg("no buffer bound"));
        }
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Reports UI-facing state changes through tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UiNotifier for LogNotifier {
    fn capability_changed(&self, capability: &Capability) {
        tracing::info!(
            mode = ?capability.mode,
            extended_animation = capability.supports_extended_animation,
            "avatar capability changed"
        );
    }

    fn selection_committed(&self, kind: ResourceKind, index: usize) {
        tracing::info!(?kind, index, "selection committed");
    }
}
