use crate::{Error, Result};

/// Dimensions of the patches a classifier or data set was built for.
///
/// The geometry is an explicit value threaded through feature generation,
/// selection and detection rather than process-wide state. Serialized
/// artifacts embed their geometry; readers reconcile it against the value
/// they were configured with via [`PatchGeometry::adopt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PatchGeometry {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl PatchGeometry {
    /// The stock detection-window geometry. A reader configured with this
    /// value is treated as "unset" and adopts whatever a file declares.
    pub const DEFAULT: PatchGeometry = PatchGeometry {
        width: 24,
        height: 24,
        channels: 1,
    };

    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of floats in a patch of this geometry.
    pub fn len(&self) -> usize {
        self.width * self.height * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconcile this (configured) geometry with one embedded in a file.
    ///
    /// If the configured value is the declared default, the embedded value
    /// wins and a warning is logged. If it was set explicitly and the file
    /// disagrees, the mismatch is an error.
    pub fn adopt(self, embedded: PatchGeometry) -> Result<PatchGeometry> {
        if self == embedded {
            return Ok(self);
        }

        if self == PatchGeometry::DEFAULT {
            log::warn!(
                "adopting patch geometry {}x{}x{} from input (configured default was {}x{}x{})",
                embedded.width,
                embedded.height,
                embedded.channels,
                self.width,
                self.height,
                self.channels
            );
            return Ok(embedded);
        }

        Err(Error::GeometryMismatch(format!(
            "configured {}x{}x{}, input declares {}x{}x{}",
            self.width, self.height, self.channels, embedded.width, embedded.height, embedded.channels
        )))
    }
}

impl Default for PatchGeometry {
    fn default() -> Self {
        PatchGeometry::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopt_keeps_matching_geometry() {
        let g = PatchGeometry::new(19, 19, 1);
        assert_eq!(g.adopt(g).unwrap(), g);
    }

    #[test]
    fn adopt_takes_embedded_when_default() {
        let embedded = PatchGeometry::new(19, 19, 3);
        assert_eq!(PatchGeometry::DEFAULT.adopt(embedded).unwrap(), embedded);
    }

    #[test]
    fn adopt_rejects_explicit_mismatch() {
        let configured = PatchGeometry::new(32, 32, 1);
        let embedded = PatchGeometry::new(19, 19, 1);
        assert!(configured.adopt(embedded).is_err());
    }
}
