//! Locating raw cover art bytes for a grid cell
//!
//! Album folders usually carry a sidecar image (`cover.jpg`, `folder.png`, ...).
//! When they don't, the first audio file is scanned for an embedded picture.
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use super::error::ThumbnailResult;

/// Where a cell's artwork comes from.
///
/// This is the reference carried by a load request; the bytes themselves are
/// only read on the worker thread, right before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtSource {
    /// An album folder: sidecar images first, then embedded art
    Folder(PathBuf),
    /// A single file: either an image, or an audio file with embedded art
    File(PathBuf),
}

/// Produces raw artwork bytes for a source.
///
/// `Ok(None)` means "no artwork embedded/found", which is an expected outcome
/// and not an error.
pub trait SourceResolver: Send + Sync {
    fn resolve(&self, source: &ArtSource) -> ThumbnailResult<Option<Vec<u8>>>;
}

/// Sidecar names tried in order, compared case-insensitively without extension
const SIDECAR_NAMES: &[&str] = &["cover", "folder", "front", "album", "albumart", "thumb"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "mp4", "aac", "ogg", "opus", "wma", "wav", "aiff", "ape",
];

/// First pass reads this much of an audio file, tags usually sit at the front
const FAST_SCAN_BYTES: usize = 256 * 1024;

/// Second pass limit for files with large tag blocks
const FULL_SCAN_BYTES: usize = 8 * 1024 * 1024;

/// Embedded pictures smaller than this are usually icons or junk markers
const MIN_EMBEDDED_BYTES: usize = 1024;

/// Filesystem-backed resolver for album folders and audio files
#[derive(Debug, Clone, Default)]
pub struct FolderArtResolver;

impl SourceResolver for FolderArtResolver {
    fn resolve(&self, source: &ArtSource) -> ThumbnailResult<Option<Vec<u8>>> {
        match source {
            ArtSource::Folder(dir) => resolve_folder(dir),
            ArtSource::File(path) => {
                if has_extension(path, IMAGE_EXTENSIONS) {
                    Ok(Some(fs::read(path)?))
                } else {
                    extract_embedded_art(path)
                }
            }
        }
    }
}

fn resolve_folder(dir: &Path) -> ThumbnailResult<Option<Vec<u8>>> {
    let mut images = Vec::new();
    let mut audio = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if has_extension(&path, IMAGE_EXTENSIONS) {
            images.push(path);
        } else if has_extension(&path, AUDIO_EXTENSIONS) {
            audio.push(path);
        }
    }

    if let Some(sidecar) = pick_sidecar(&images) {
        log::debug!("Using sidecar artwork {}", sidecar.display());
        return Ok(Some(fs::read(sidecar)?));
    }

    audio.sort();
    for track in &audio {
        if let Some(bytes) = extract_embedded_art(track)? {
            return Ok(Some(bytes));
        }
    }

    Ok(None)
}

/// Prefer well-known names; fall back to the only image in the folder
fn pick_sidecar(images: &[PathBuf]) -> Option<&PathBuf> {
    for name in SIDECAR_NAMES {
        let found = images.iter().find(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy().to_lowercase() == *name)
                .unwrap_or(false)
        });
        if found.is_some() {
            return found;
        }
    }

    if images.len() == 1 {
        images.first()
    } else {
        None
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Scan an audio file for an embedded JPEG or PNG, in two passes
fn extract_embedded_art(path: &Path) -> ThumbnailResult<Option<Vec<u8>>> {
    let mut file = File::open(path)?;
    let mut data = Vec::with_capacity(FAST_SCAN_BYTES);
    (&mut file).take(FAST_SCAN_BYTES as u64).read_to_end(&mut data)?;

    if let Some(art) = find_embedded_picture(&data) {
        return Ok(Some(art));
    }

    if data.len() < FAST_SCAN_BYTES {
        // Whole file already scanned
        return Ok(None);
    }

    file.take((FULL_SCAN_BYTES - FAST_SCAN_BYTES) as u64).read_to_end(&mut data)?;
    Ok(find_embedded_picture(&data))
}

/// Return the largest embedded picture found in `data`
pub fn find_embedded_picture(data: &[u8]) -> Option<Vec<u8>> {
    let jpeg = find_jpeg(data);
    let png = find_png(data);

    match (jpeg, png) {
        (Some(j), Some(p)) => Some(if p.len() > j.len() { p } else { j }),
        (j, p) => j.or(p),
    }
}

fn find_jpeg(data: &[u8]) -> Option<Vec<u8>> {
    const SOI: &[u8] = b"\xff\xd8\xff";

    let mut largest: Option<&[u8]> = None;
    let mut pos = 0;
    while let Some(start) = find(&data[pos..], SOI).map(|p| p + pos) {
        match jpeg_len(&data[start..]) {
            Some(len) => {
                let candidate = &data[start..start + len];
                let larger = largest.map_or(true, |l| candidate.len() > l.len());
                if candidate.len() >= MIN_EMBEDDED_BYTES && larger {
                    largest = Some(candidate);
                }
                pos = start + len;
            }
            None => pos = start + SOI.len(),
        }
    }

    largest.map(<[u8]>::to_vec)
}

/// Length of the JPEG stream starting at `data[0]`, found by walking its
/// segments so EXIF thumbnails nested in APP1 don't end the stream early.
fn jpeg_len(data: &[u8]) -> Option<usize> {
    let mut i = 2;
    loop {
        if *data.get(i)? != 0xFF {
            return None;
        }
        // Fill bytes
        while *data.get(i + 1)? == 0xFF {
            i += 1;
        }
        let marker = *data.get(i + 1)?;
        match marker {
            0xD9 => return Some(i + 2),
            0x01 | 0xD0..=0xD7 => i += 2,
            _ => {
                let len = u16::from_be_bytes([*data.get(i + 2)?, *data.get(i + 3)?]) as usize;
                if len < 2 {
                    return None;
                }
                i += 2 + len;
                if marker == 0xDA {
                    // Entropy-coded data runs until the next real marker
                    loop {
                        if *data.get(i)? == 0xFF {
                            match *data.get(i + 1)? {
                                0x00 | 0xD0..=0xD7 => i += 2,
                                _ => break,
                            }
                        } else {
                            i += 1;
                        }
                    }
                }
            }
        }
    }
}

fn find_png(data: &[u8]) -> Option<Vec<u8>> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    // IEND chunk type plus its CRC
    const IEND: &[u8] = b"IEND\xaeB`\x82";

    let start = find(data, SIGNATURE)?;
    let end = find(&data[start..], IEND)? + start + IEND.len();
    let candidate = &data[start..end];
    (candidate.len() >= MIN_EMBEDDED_BYTES).then(|| candidate.to_vec())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}


#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn resolve_dir(path: &Path) -> Option<Vec<u8>> {
        FolderArtResolver
            .resolve(&ArtSource::Folder(path.to_path_buf()))
            .unwrap()
    }

    fn jpeg_bytes() -> Vec<u8> {
        let img = RgbImage::from_fn(96, 96, |x, y| {
            Rgb([(x * 7 ^ y * 13) as u8, (x * y) as u8, (x + y * 3) as u8])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_finds_jpeg_inside_audio_junk() {
        let jpeg = jpeg_bytes();
        let mut data = b"ID3\x04\x00\x00junk-before-picture".to_vec();
        data.extend_from_slice(&jpeg);
        data.extend_from_slice(&[0x12; 4096]);

        let found = find_embedded_picture(&data).unwrap();
        assert_eq!(found, jpeg);
    }

    #[test]
    fn test_no_picture_in_plain_data() {
        assert!(find_embedded_picture(&[0u8; 8192]).is_none());
        // A lone SOI marker with nothing valid behind it
        assert!(find_embedded_picture(b"\xff\xd8\xff\x00\x01").is_none());
    }

    #[test]
    fn test_folder_prefers_named_sidecar() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("back.jpg"), b"back").unwrap();
        fs::write(dir.path().join("Cover.JPG"), b"front cover").unwrap();
        fs::write(dir.path().join("01 - intro.mp3"), b"no art here").unwrap();

        let bytes = resolve_dir(dir.path());
        assert_eq!(bytes.as_deref(), Some(&b"front cover"[..]));
    }

    #[test]
    fn test_folder_falls_back_to_embedded_art() {
        let dir = tempdir().unwrap();
        let jpeg = jpeg_bytes();
        let mut track = b"ID3 header".to_vec();
        track.extend_from_slice(&jpeg);
        track.extend_from_slice(&[0x55; 2048]);
        fs::write(dir.path().join("01.mp3"), &track).unwrap();

        let bytes = resolve_dir(dir.path());
        assert_eq!(bytes, Some(jpeg));
    }

    #[test]
    fn test_folder_without_art_resolves_to_none() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("01.flac"), [0u8; 4096]).unwrap();
        fs::write(dir.path().join("notes.txt"), b"liner notes").unwrap();

        let bytes = resolve_dir(dir.path());
        assert!(bytes.is_none());
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone");
        assert!(FolderArtResolver.resolve(&ArtSource::Folder(gone)).is_err());
    }
}
