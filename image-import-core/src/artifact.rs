use std::path::{Path, PathBuf};

use crate::import::ImageFormat;

/// A local disk image file and its declared format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    path: PathBuf,
    format: ImageFormat,
}

impl ArtifactRef {
    pub fn new(path: impl Into<PathBuf>, format: ImageFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Pick the first of `files` whose name ends in `.<format>`.
    pub fn locate<P: AsRef<Path>>(files: &[P], format: ImageFormat) -> Option<Self> {
        let suffix = format!(".{format}");
        for path in files {
            let path = path.as_ref();
            if path.to_string_lossy().ends_with(&suffix) {
                return Some(Self::new(path, format));
            }
        }
        None
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_matching_suffix() {
        let files = [
            "output/disk.vmdk",
            "output/disk.raw",
            "output/disk-2.raw",
        ];
        let found = ArtifactRef::locate(&files, ImageFormat::Raw).expect("raw present");
        assert_eq!(found.path(), Path::new("output/disk.raw"));
        assert_eq!(found.format(), ImageFormat::Raw);
    }

    #[test]
    fn no_match_yields_none() {
        let files = [PathBuf::from("output/disk.vhdx")];
        assert!(ArtifactRef::locate(&files, ImageFormat::Vhd).is_none());
    }

    #[test]
    fn extension_must_be_a_suffix() {
        let files = ["image.qcow2.sha256"];
        assert!(ArtifactRef::locate(&files, ImageFormat::Qcow2).is_none());
    }
}
