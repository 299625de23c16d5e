//! Default content loader.
//!
//! Every call to [`Loader::load`] gets its own scratch directory below the
//! configured temporary directory; the caller releases it with
//! [`Loader::clean`]. Errors raised after the directory exists carry it in
//! [`LoadError::dir`].

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::asset::AssetMode;
use crate::config::LoaderConfig;
use crate::contract::{BoxError, LoadedContent, Loader};
use crate::error::LoadError;

const FILE_SCHEME: &str = "file://";

/// Local file name for a downloaded source: the last path segment with query
/// and fragment removed, or `asset` when nothing is left.
pub fn file_name(source: &str) -> String {
    let segment = source.rsplit('/').next().unwrap_or_default();
    let name = segment
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    if name.is_empty() {
        "asset".to_string()
    } else {
        name.to_string()
    }
}

/// A structured object read in index mode.
///
/// Either a flat map of file name to text, or separate `data` (text) and
/// `binaryData` (base64) sections.
#[derive(Deserialize)]
#[serde(untagged)]
enum IndexObject {
    Sections(IndexSections),
    Flat(serde_json::Map<String, serde_json::Value>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IndexSections {
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default, rename = "binaryData")]
    binary_data: BTreeMap<String, String>,
}

impl IndexObject {
    /// File name and content of every entry accepted by `filter`.
    fn into_files(self, src: &str, filter: &Regex) -> Result<Vec<(String, Vec<u8>)>, BoxError> {
        let mut files = Vec::new();
        match self {
            IndexObject::Flat(entries) => {
                for (key, value) in entries {
                    if !filter.is_match(&key) {
                        continue;
                    }
                    let serde_json::Value::String(content) = value else {
                        return Err(format!("entry {key} of object {src} is not a string").into());
                    };
                    files.push((key, content.into_bytes()));
                }
            }
            IndexObject::Sections(sections) => {
                if let Some(key) = sections
                    .data
                    .keys()
                    .find(|key| sections.binary_data.contains_key(*key))
                {
                    return Err(
                        format!("entry {key} of object {src} is both text and binary").into(),
                    );
                }
                for (key, content) in sections.data {
                    if filter.is_match(&key) {
                        files.push((key, content.into_bytes()));
                    }
                }
                for (key, encoded) in sections.binary_data {
                    if !filter.is_match(&key) {
                        continue;
                    }
                    let content = STANDARD.decode(encoded).map_err(|e| {
                        format!("while copying binary entry {key} of object {src}: {e}")
                    })?;
                    files.push((key, content));
                }
            }
        }
        Ok(files)
    }
}

pub struct DefaultLoader {
    temporary_dir: PathBuf,
    objects_dir: PathBuf,
    client: Client,
}

impl DefaultLoader {
    pub fn new(config: &LoaderConfig) -> Result<Self, BoxError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        Ok(Self {
            temporary_dir: config
                .temporary_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            objects_dir: config.objects_dir.clone(),
            client,
        })
    }

    async fn scratch_dir(&self, asset_name: &str) -> Result<PathBuf, BoxError> {
        let dir = self
            .temporary_dir
            .join(format!("{}-{}", asset_name, Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Copies `src` into `destination`. `file://` sources are read from disk.
    async fn download(&self, src: &str, destination: &Path) -> Result<u64, BoxError> {
        if let Some(path) = src.strip_prefix(FILE_SCHEME) {
            return Ok(tokio::fs::copy(path, destination).await?);
        }

        let resp = self.client.get(src).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("downloading {src} failed with status {status}").into());
        }
        let bytes = resp.bytes().await?;
        tokio::fs::write(destination, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn load_single(&self, src: &str, dir: &Path) -> Result<Vec<String>, BoxError> {
        let name = file_name(src);
        let size = self.download(src, &dir.join(&name)).await?;
        debug!(src = %src, file = %name, size, "Downloaded single file");
        Ok(vec![name])
    }

    async fn load_package(
        &self,
        src: &str,
        asset_name: &str,
        dir: &Path,
        filter: Regex,
    ) -> Result<Vec<String>, BoxError> {
        let archive = tempfile::Builder::new()
            .prefix(asset_name)
            .suffix(".zip")
            .tempfile_in(&self.temporary_dir)?;
        let size = self.download(src, archive.path()).await?;
        debug!(src = %src, size, "Downloaded package");

        let target = dir.to_path_buf();
        let files =
            tokio::task::spawn_blocking(move || extract_zip(archive.path(), &target, &filter))
                .await??;
        Ok(files)
    }

    async fn load_index(&self, src: &str, dir: &Path, filter: Regex) -> Result<Vec<String>, BoxError> {
        let (namespace, name) = match src.split('/').collect::<Vec<_>>()[..] {
            [ns, name] if !ns.is_empty() && !name.is_empty() => (ns, name),
            _ => return Err(format!("{src}: invalid source format").into()),
        };

        let path = self
            .objects_dir
            .join(namespace)
            .join(format!("{name}.json"));
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| format!("while reading object {src} from {}: {e}", path.display()))?;
        let object: IndexObject = serde_json::from_slice(&raw)
            .map_err(|e| format!("while decoding object {src}: {e}"))?;

        let mut files = Vec::new();
        for (key, content) in object.into_files(src, &filter)? {
            if !is_plain_name(&key) {
                return Err(format!("entry {key} of object {src} is not a valid file name").into());
            }
            tokio::fs::write(dir.join(&key), content).await?;
            files.push(key);
        }
        Ok(files)
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn extract_zip(archive: &Path, target: &Path, filter: &Regex) -> Result<Vec<String>, BoxError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    let mut files = Vec::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(format!("archive entry {} escapes the target directory", entry.name()).into());
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if !filter.is_match(&name) {
            continue;
        }

        let destination = target.join(&relative);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&destination)?;
        std::io::copy(&mut entry, &mut out)?;
        files.push(name);
    }
    Ok(files)
}

#[async_trait]
impl Loader for DefaultLoader {
    async fn load(
        &self,
        src: &str,
        asset_name: &str,
        mode: AssetMode,
        filter: &str,
    ) -> Result<LoadedContent, LoadError> {
        let dir = self
            .scratch_dir(asset_name)
            .await
            .map_err(|e| LoadError::new(None, e))?;

        let loaded = match mode {
            AssetMode::Single => self.load_single(src, &dir).await,
            AssetMode::Package | AssetMode::Index => match Regex::new(filter) {
                Err(e) => Err(format!("while compiling filter '{filter}': {e}").into()),
                Ok(re) if mode == AssetMode::Package => {
                    self.load_package(src, asset_name, &dir, re).await
                }
                Ok(re) => self.load_index(src, &dir, re).await,
            },
        };

        match loaded {
            Ok(mut files) => {
                files.sort();
                info!(src = %src, asset = %asset_name, ?mode, files = files.len(), "Loaded asset content");
                Ok(LoadedContent { dir, files })
            }
            Err(e) => Err(LoadError::new(Some(dir), e)),
        }
    }

    async fn clean(&self, dir: &Path) -> Result<(), BoxError> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
