//! Cover thumbnail generation

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::config::ThumbnailConfig;
use crate::error::{LibraryError, Result};

/// Raster formats accepted as thumbnail sources
pub const SOURCE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

/// Fill colour for placeholder thumbnails
const PLACEHOLDER: Rgb<u8> = Rgb([200, 200, 200]);

/// Summary of a thumbnail run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThumbnailReport {
    /// Images found in the source folder
    pub found: usize,
    pub processed: usize,
    /// Thumbnail already present
    pub skipped: usize,
    pub placeholders: usize,
    pub errors: usize,
    pub original_bytes: u64,
    pub thumbnail_bytes: u64,
    pub elapsed_secs: f64,
}

impl ThumbnailReport {
    /// Size saved relative to the source images, in percent
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.thumbnail_bytes as f64 / self.original_bytes as f64) * 100.0
    }

    pub fn files_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / self.elapsed_secs
    }
}

impl fmt::Display for ThumbnailReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Thumbnail generation complete")?;
        writeln!(f, "  Images found:   {}", self.found)?;
        writeln!(f, "  Generated:      {}", self.processed)?;
        writeln!(f, "  Skipped:        {}", self.skipped)?;
        writeln!(f, "  Placeholders:   {}", self.placeholders)?;
        writeln!(f, "  Errors:         {}", self.errors)?;
        writeln!(f, "  Original size:  {}", format_file_size(self.original_bytes))?;
        writeln!(f, "  Thumbnail size: {}", format_file_size(self.thumbnail_bytes))?;
        writeln!(f, "  Reduction:      {:.1}%", self.reduction_percent())?;
        write!(f, "  Speed:          {:.1} files/sec", self.files_per_sec())
    }
}

/// Human readable byte count
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

fn is_source_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Source images in `dir`, sorted by name
pub fn scan_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(LibraryError::NotFound(dir.display().to_string()));
    }
    let mut images: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_source_image(p))
        .collect();
    images.sort();
    Ok(images)
}

/// Composite any transparency onto white
fn flatten(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

/// Fit inside `width` x `height`, keeping the aspect ratio; never enlarges
pub fn make_thumbnail(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let fitted = if w > width || h > height {
        image.resize(width, height, FilterType::Lanczos3)
    } else {
        image.clone()
    };
    flatten(&fitted)
}

/// Generate a thumbnail for every image in `source_dir`
///
/// # Arguments
/// - `source_dir`: cover images
/// - `output_dir`: where `<stem>.png` thumbnails are written
/// - `config`: target size and placeholder policy
pub fn generate_thumbnails(source_dir: &Path, output_dir: &Path, config: &ThumbnailConfig) -> Result<ThumbnailReport> {
    let started = Instant::now();
    let images = scan_images(source_dir)?;
    fs::create_dir_all(output_dir)?;

    let mut report = ThumbnailReport {
        found: images.len(),
        ..ThumbnailReport::default()
    };
    info!("{} images in {}", images.len(), source_dir.display());

    for (index, source) in images.iter().enumerate() {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let target = output_dir.join(format!("{}.png", stem));

        if target.exists() {
            report.skipped += 1;
            continue;
        }

        let original_size = fs::metadata(source).map(|m| m.len()).unwrap_or(0);

        let thumbnail = match image::open(source) {
            Ok(img) => make_thumbnail(&img, config.width, config.height),
            Err(e) if config.placeholder_on_error => {
                warn!("{} could not be decoded, writing placeholder: {}", source.display(), e);
                report.placeholders += 1;
                RgbImage::from_pixel(config.width, config.height, PLACEHOLDER)
            }
            Err(e) => {
                warn!("{} could not be decoded: {}", source.display(), e);
                report.errors += 1;
                continue;
            }
        };

        if let Err(e) = thumbnail.save(&target) {
            warn!("Could not write {}: {}", target.display(), e);
            report.errors += 1;
            continue;
        }

        report.processed += 1;
        report.original_bytes += original_size;
        report.thumbnail_bytes += fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
        debug!("{} -> {}", source.display(), target.display());

        if (index + 1) % 100 == 0 {
            info!("Thumbnails: {}/{}", index + 1, images.len());
        }
    }

    report.elapsed_secs = started.elapsed().as_secs_f64();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn config() -> ThumbnailConfig {
        ThumbnailConfig { width: 64, height: 85, placeholder_on_error: true }
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_file_size(2 * 1024u64.pow(4)), "2.0 TB");
    }

    #[test]
    fn test_thumbnail_keeps_aspect_and_never_enlarges() {
        let big = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([10, 20, 30])));
        let thumb = make_thumbnail(&big, 64, 85);
        assert_eq!(thumb.dimensions(), (64, 48));

        let small = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 30, Rgb([10, 20, 30])));
        assert_eq!(make_thumbnail(&small, 64, 85).dimensions(), (20, 30));
    }

    #[test]
    fn test_transparency_flattened_to_white() {
        let clear = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let thumb = make_thumbnail(&clear, 64, 85);
        assert_eq!(thumb.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_generate_thumbnails() {
        let temp = TempDir::new().unwrap();
        let covers = temp.path().join("Covers");
        let thumbs = temp.path().join("Thumbs");
        fs::create_dir_all(&covers).unwrap();

        RgbImage::from_pixel(300, 425, Rgb([0, 100, 200]))
            .save(covers.join("Good Book.png"))
            .unwrap();
        RgbImage::from_pixel(200, 100, Rgb([50, 50, 50]))
            .save(covers.join("Wide.jpg"))
            .unwrap();
        fs::write(covers.join("Broken.png"), b"not an image").unwrap();
        fs::write(covers.join("readme.txt"), b"skip me").unwrap();

        let report = generate_thumbnails(&covers, &thumbs, &config()).unwrap();
        assert_eq!(report.found, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.placeholders, 1);
        assert_eq!(report.errors, 0);

        let good = image::open(thumbs.join("Good Book.png")).unwrap();
        assert_eq!(good.dimensions(), (60, 85));
        let placeholder = image::open(thumbs.join("Broken.png")).unwrap().to_rgb8();
        assert_eq!(placeholder.get_pixel(0, 0), &Rgb([200, 200, 200]));

        let rerun = generate_thumbnails(&covers, &thumbs, &config()).unwrap();
        assert_eq!(rerun.skipped, 3);
        assert_eq!(rerun.processed, 0);
    }

    #[test]
    fn test_decode_error_without_placeholder() {
        let temp = TempDir::new().unwrap();
        let covers = temp.path().join("Covers");
        fs::create_dir_all(&covers).unwrap();
        fs::write(covers.join("Broken.png"), b"garbage").unwrap();

        let cfg = ThumbnailConfig { placeholder_on_error: false, ..config() };
        let report = generate_thumbnails(&covers, &temp.path().join("Thumbs"), &cfg).unwrap();
        assert_eq!(report.errors, 1);
        assert!(!temp.path().join("Thumbs").join("Broken.png").exists());
    }

    #[test]
    fn test_missing_source_dir() {
        let temp = TempDir::new().unwrap();
        let result = generate_thumbnails(&temp.path().join("nope"), temp.path(), &config());
        assert!(matches!(result, Err(LibraryError::NotFound(_))));
    }
}
