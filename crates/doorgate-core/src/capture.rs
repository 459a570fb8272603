//! Signature extraction from a single frame.
//!
//! [`CaptureGate`] wraps an [`Embedder`] with the two error policies the
//! session needs: recognition swallows faults (a bad frame is just "no face"),
//! enrollment reports them so the operator learns the capture failed.

use crate::types::Signature;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model file not found: {0}")]
    ModelNotFound(String),
}

/// External face-embedding capability.
///
/// `Ok(None)` means the frame was readable but held no face.
pub trait Embedder: Send {
    fn embed(&mut self, image: &[u8]) -> Result<Option<Signature>, EmbedError>;
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&mut self, image: &[u8]) -> Result<Option<Signature>, EmbedError> {
        (**self).embed(image)
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame has been submitted yet")]
    NoFrame,
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),
}

/// Single-frame extractor with mode-specific error handling.
pub struct CaptureGate<E> {
    embedder: E,
}

impl<E: Embedder> CaptureGate<E> {
    pub fn new(embedder: E) -> Self {
        Self { embedder }
    }

    /// Recognition path: any embedder fault is logged and reported as no face.
    pub fn extract_for_recognition(&mut self, image: &[u8]) -> Option<Signature> {
        match self.embedder.embed(image) {
            Ok(Some(sig)) if !sig.is_empty() => Some(sig),
            Ok(Some(_)) => {
                tracing::warn!("embedder returned an empty signature; treating as no face");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, bytes = image.len(), "recognition capture failed; treating as no face");
                None
            }
        }
    }

    /// Enrollment path: faults propagate, no face is `Ok(None)`.
    pub fn extract_for_enrollment(&mut self, image: &[u8]) -> Result<Option<Signature>, CaptureError> {
        let sig = self.embedder.embed(image)?;
        Ok(sig.filter(|s| !s.is_empty()))
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Script {
        Face(Vec<f32>),
        NoFace,
        Fault,
    }

    struct ScriptedEmbedder(Script);

    impl Embedder for ScriptedEmbedder {
        fn embed(&mut self, _image: &[u8]) -> Result<Option<Signature>, EmbedError> {
            match &self.0 {
                Script::Face(v) => Ok(Some(Signature::new(v.clone()))),
                Script::NoFace => Ok(None),
                Script::Fault => Err(EmbedError::Decode("truncated jpeg".into())),
            }
        }
    }

    #[test]
    fn test_recognition_absorbs_faults() {
        let mut gate = CaptureGate::new(ScriptedEmbedder(Script::Fault));
        assert!(gate.extract_for_recognition(b"junk").is_none());
    }

    #[test]
    fn test_enrollment_propagates_faults() {
        let mut gate = CaptureGate::new(ScriptedEmbedder(Script::Fault));
        let err = gate.extract_for_enrollment(b"junk").unwrap_err();
        assert!(matches!(err, CaptureError::Embed(EmbedError::Decode(_))));
    }

    #[test]
    fn test_no_face_is_not_an_error() {
        let mut gate = CaptureGate::new(ScriptedEmbedder(Script::NoFace));
        assert!(gate.extract_for_recognition(b"frame").is_none());
        assert!(gate.extract_for_enrollment(b"frame").unwrap().is_none());
    }

    #[test]
    fn test_face_passes_through() {
        let mut gate = CaptureGate::new(ScriptedEmbedder(Script::Face(vec![0.6, 0.8])));
        assert_eq!(gate.extract_for_recognition(b"frame").unwrap().values(), &[0.6, 0.8]);
        assert_eq!(gate.extract_for_enrollment(b"frame").unwrap().unwrap().dim(), 2);
    }

    #[test]
    fn test_empty_signature_is_no_face() {
        let mut gate = CaptureGate::new(ScriptedEmbedder(Script::Face(vec![])));
        assert!(gate.extract_for_recognition(b"frame").is_none());
        assert!(gate.extract_for_enrollment(b"frame").unwrap().is_none());
    }
}
