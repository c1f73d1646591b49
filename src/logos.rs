//! LogoSync - team logos on disk
//!
//! The base64 payload in the match state is the source of truth. Files under
//! the logo directory are a derived cache that vMix and the static file server
//! read, named `logo_{slot}_{timestamp}.png`. Each slot has at most one file.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use image::ImageFormat;
use parking_lot::RwLock;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::scoring::Side;

/// URL path segment under which logo files are served
pub const LOGO_URL_DIR: &str = "logos";

/// Callback invoked after any logo file changes
pub type ChangeHook = Box<dyn Fn() + Send + Sync>;

/// A slot's logo after loading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedLogo {
    pub base64: String,
    /// Relative path, e.g. `logos/logo_A_1700000000000.png`
    pub path: String,
}

pub struct LogoStore {
    dir: PathBuf,
    on_change: Arc<RwLock<Option<ChangeHook>>>,
}

impl LogoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            on_change: Arc::new(RwLock::new(None)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_on_change(&self, hook: ChangeHook) {
        *self.on_change.write() = Some(hook);
    }

    fn notify_change(&self) {
        if let Some(hook) = self.on_change.read().as_ref() {
            hook();
        }
    }

    fn slot_prefix(slot: Side) -> String {
        format!("logo_{}_", slot.as_str())
    }

    fn relative(file_name: &str) -> String {
        format!("{}/{}", LOGO_URL_DIR, file_name)
    }

    /// Files currently stored for `slot`
    async fn slot_files(&self, slot: Side) -> Result<Vec<PathBuf>> {
        let prefix = Self::slot_prefix(slot);
        let mut files = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to list logo directory: {}", self.dir.display())
                })
            },
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".png") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn remove_slot_files(&self, slot: Side) -> Result<usize> {
        let files = self.slot_files(slot).await?;
        for file in &files {
            fs::remove_file(file)
                .await
                .with_context(|| format!("Failed to remove old logo: {}", file.display()))?;
        }
        Ok(files.len())
    }

    /// Decode `payload`, replace the slot's file and return its relative path
    pub async fn save_logo(&self, payload: &str, slot: Side) -> Result<String> {
        let path = self.write_slot(payload, slot).await?;
        self.notify_change();
        Ok(path)
    }

    async fn write_slot(&self, payload: &str, slot: Side) -> Result<String> {
        let png = decode_to_png(payload)?;

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create logo directory: {}", self.dir.display()))?;

        let removed = self.remove_slot_files(slot).await?;
        let file_name = format!(
            "{}{}.png",
            Self::slot_prefix(slot),
            Utc::now().timestamp_millis()
        );
        let file = self.dir.join(&file_name);
        fs::write(&file, &png)
            .await
            .with_context(|| format!("Failed to write logo: {}", file.display()))?;

        debug!(
            "Logo for team {} written ({} bytes, {} old file(s) removed)",
            slot,
            png.len(),
            removed
        );
        Ok(Self::relative(&file_name))
    }

    /// Reconcile a slot with the state record
    ///
    /// A present payload is rewritten to disk, repairing any drift. Without
    /// one, the payload is read back from the slot's file (legacy data).
    pub async fn load_team_logo(&self, slot: Side, payload: Option<&str>) -> Result<Option<LoadedLogo>> {
        if let Some(payload) = payload.map(str::trim).filter(|p| !p.is_empty()) {
            let path = self.save_logo(payload, slot).await?;
            return Ok(Some(LoadedLogo {
                base64: strip_data_url(payload).to_string(),
                path,
            }));
        }

        let Some(file) = self.slot_files(slot).await?.pop() else {
            return Ok(None);
        };
        let bytes = fs::read(&file)
            .await
            .with_context(|| format!("Failed to read logo: {}", file.display()))?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!("Recovered team {} logo from {}", slot, file_name);
        Ok(Some(LoadedLogo {
            base64: STANDARD.encode(bytes),
            path: Self::relative(&file_name),
        }))
    }

    /// Re-derive both slots after the teams swapped sides
    ///
    /// `a` and `b` are the payloads now assigned to each slot. Both slots are
    /// rewritten from them; existing files are never renamed across slots.
    pub async fn swap_team_logos(
        &self,
        a: Option<&str>,
        b: Option<&str>,
    ) -> Result<(Option<String>, Option<String>)> {
        let mut paths = (None, None);
        for (slot, payload, out) in [(Side::A, a, &mut paths.0), (Side::B, b, &mut paths.1)] {
            match payload.map(str::trim).filter(|p| !p.is_empty()) {
                Some(payload) => *out = Some(self.write_slot(payload, slot).await?),
                None => {
                    self.remove_slot_files(slot).await?;
                },
            }
        }
        info!("🔁 Team logos re-derived after swap");
        self.notify_change();
        Ok(paths)
    }

    pub async fn remove_logo(&self, slot: Side) -> Result<()> {
        let removed = self.remove_slot_files(slot).await?;
        if removed > 0 {
            debug!("Removed {} logo file(s) for team {}", removed, slot);
            self.notify_change();
        }
        Ok(())
    }
}

/// Payload without a `data:image/...;base64,` prefix
fn strip_data_url(payload: &str) -> &str {
    let payload = payload.trim();
    match payload.split_once(";base64,") {
        Some((head, data)) if head.starts_with("data:") => data,
        _ => payload,
    }
}

/// Decode a base64 image and make sure the bytes are PNG
pub fn decode_to_png(payload: &str) -> Result<Vec<u8>> {
    let data: String = strip_data_url(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(data.as_bytes())
        .context("Logo payload is not valid base64")?;

    let format = image::guess_format(&bytes).context("Logo payload is not a recognized image")?;
    if format == ImageFormat::Png {
        return Ok(bytes);
    }

    let decoded = image::load_from_memory_with_format(&bytes, format)
        .with_context(|| format!("Failed to decode {:?} logo", format))?;
    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to transcode logo to PNG")?;
    Ok(png)
}
