use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::error::ConvertError;

/// Longest edge of a converted image, in pixels.
pub const MAX_DIMENSION: u32 = 2048;
/// JPEG quality for converted images.
pub const JPEG_QUALITY: u8 = 85;

/// Black-box HEIC → JPEG conversion.
///
/// Implementations must honour embedded orientation, fit the image inside a
/// `max_dimension` square without upscaling, encode at `quality`, and strip
/// non-essential metadata where they can.
#[async_trait]
pub trait ImageConverter: Send + Sync {
    /// Fail fast when the converter cannot run at all.
    async fn check(&self) -> Result<(), ConvertError>;

    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        max_dimension: u32,
        quality: u8,
    ) -> Result<(), ConvertError>;
}

/// Converter backed by the ImageMagick command-line tool.
#[derive(Debug, Clone)]
pub struct MagickConverter {
    program: String,
}

impl MagickConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(source: &Path, target: &Path, max_dimension: u32, quality: u8) -> Vec<String> {
        vec![
            source.display().to_string(),
            "-auto-orient".to_string(),
            "-resize".to_string(),
            // `>` only shrinks images larger than the box.
            format!("{0}x{0}>", max_dimension),
            "-quality".to_string(),
            quality.to_string(),
            "-strip".to_string(),
            target.display().to_string(),
        ]
    }
}

#[async_trait]
impl ImageConverter for MagickConverter {
    async fn check(&self) -> Result<(), ConvertError> {
        let output = Command::new(&self.program)
            .arg("-version")
            .output()
            .await
            .map_err(|e| ConvertError::Unavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ConvertError::Unavailable {
                program: self.program.clone(),
                reason: format!("-version exited with {}", output.status),
            });
        }
        Ok(())
    }

    async fn convert(
        &self,
        source: &Path,
        target: &Path,
        max_dimension: u32,
        quality: u8,
    ) -> Result<(), ConvertError> {
        let output = Command::new(&self.program)
            .args(Self::args(source, target, max_dimension, quality))
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ConvertError::Tool {
                path: source.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magick_args() {
        let args = MagickConverter::args(Path::new("/a/IMG.HEIC"), Path::new("/s/IMG.jpg"), 2048, 85);
        assert_eq!(
            args,
            vec![
                "/a/IMG.HEIC",
                "-auto-orient",
                "-resize",
                "2048x2048>",
                "-quality",
                "85",
                "-strip",
                "/s/IMG.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let converter = MagickConverter::new("definitely-not-a-real-converter-binary");
        assert!(matches!(
            converter.check().await,
            Err(ConvertError::Unavailable { .. })
        ));
    }
}
