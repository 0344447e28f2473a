use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::embedder::FaceEmbedder;
use crate::error::EmbedError;
use crate::face::{BoundingBox, DetectedFace};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// HashEmbedder is a deterministic stand-in for a real face model.
///
/// Every non-empty photo yields exactly one face whose unit-length
/// embedding is derived from a hash of the bytes, so identical files embed
/// identically and different files are nearly orthogonal. Useful for local
/// runs and tests without a model service.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// The embedding this embedder produces for `photo`.
    pub fn vector_for(&self, photo: &[u8]) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(fnv1a(photo));
        let mut v: Vec<f32> = (0..self.dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
        if norm > 0.0 {
            let s = (1.0 / norm) as f32;
            for x in &mut v {
                *x *= s;
            }
        }
        v
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    data.iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

#[async_trait::async_trait]
impl FaceEmbedder for HashEmbedder {
    async fn embed(&self, photo: &[u8]) -> Result<Vec<DetectedFace>, EmbedError> {
        if photo.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![DetectedFace {
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            embedding: self.vector_for(photo),
        }])
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_deterministic() {
        let e = HashEmbedder::new(64);
        let a = e.embed(b"alice.png").await.unwrap();
        let b = e.embed(b"alice.png").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].embedding.len(), 64);
        assert!((dot(&a[0].embedding, &a[0].embedding) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_different_photos_differ() {
        let e = HashEmbedder::new(128);
        let a = e.vector_for(b"photo-a");
        let b = e.vector_for(b"photo-b");
        assert!(dot(&a, &b) < 0.5);
    }

    #[tokio::test]
    async fn test_empty_photo_has_no_face() {
        let e = HashEmbedder::new(8);
        assert!(e.embed(b"").await.unwrap().is_empty());
    }
}
