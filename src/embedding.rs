// src/embedding.rs
//
// Latent item embeddings and their noisy lower-dimensional observations.
//
// Each run fixes a random projection matrix P (obs_dim x emb_dim) and a
// latent value direction theta over the true embedding space. Within the
// run, observation-to-truth correlation is therefore stable; across runs it
// varies with the seed. Draw order is part of the determinism contract:
//
//   run start: P row-major, then theta
//   per item:  embedding coordinates in order
//   per observation: projection, then noise coordinates in order

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::SimConfig;

/// Run-scoped generator for item embeddings, observations, and the value
/// signal both are graded against.
#[derive(Debug, Clone)]
pub struct EmbeddingGenerator {
    embedding_size: usize,
    obs_embedding_size: usize,
    /// Per-coordinate standard deviation of the embedding draw.
    embedding_std: f64,
    /// Fixed per-run projection, row-major (obs_embedding_size rows of
    /// embedding_size coordinates).
    projection: Vec<f64>,
    /// Latent value direction over the true embedding space.
    value_direction: Vec<f64>,
    /// Value direction carried into observation space (P * theta), so the
    /// estimate a bidder forms from an observation correlates with truth.
    obs_value_direction: Vec<f64>,
}

impl EmbeddingGenerator {
    /// Draw the run-scoped projection and value direction from `rng`.
    pub fn new(cfg: &SimConfig, rng: &mut ChaCha8Rng) -> Self {
        let d = cfg.embedding_size;
        let d_obs = cfg.obs_embedding_size;

        // Projection entries are N(0, 1/d) so projected coordinates keep
        // roughly unit scale regardless of the true dimensionality.
        let proj_std = (1.0 / d as f64).sqrt();
        let mut projection = Vec::with_capacity(d_obs * d);
        for _ in 0..d_obs * d {
            let z: f64 = rng.sample(StandardNormal);
            projection.push(z * proj_std);
        }

        let mut value_direction = Vec::with_capacity(d);
        for _ in 0..d {
            let z: f64 = rng.sample(StandardNormal);
            value_direction.push(z);
        }

        let mut obs_value_direction = vec![0.0; d_obs];
        for (row, out) in obs_value_direction.iter_mut().enumerate() {
            let row_start = row * d;
            let mut acc = 0.0;
            for col in 0..d {
                acc += projection[row_start + col] * value_direction[col];
            }
            *out = acc;
        }

        Self {
            embedding_size: d,
            obs_embedding_size: d_obs,
            embedding_std: cfg.embedding_var.sqrt(),
            projection,
            value_direction,
            obs_value_direction,
        }
    }

    /// Draw one item embedding, i.i.d. N(0, embedding_var) per coordinate.
    pub fn draw_item_embedding(&self, rng: &mut ChaCha8Rng) -> Vec<f64> {
        let mut e = Vec::with_capacity(self.embedding_size);
        for _ in 0..self.embedding_size {
            let z: f64 = rng.sample(StandardNormal);
            e.push(z * self.embedding_std);
        }
        e
    }

    /// Project an embedding into observation space and add independent
    /// noise with the same per-coordinate variance as the embedding draw.
    pub fn project_observation(&self, embedding: &[f64], rng: &mut ChaCha8Rng) -> Vec<f64> {
        let mut obs = Vec::with_capacity(self.obs_embedding_size);
        for row in 0..self.obs_embedding_size {
            let row_start = row * self.embedding_size;
            let mut acc = 0.0;
            for (col, &e) in embedding.iter().enumerate() {
                acc += self.projection[row_start + col] * e;
            }
            obs.push(acc);
        }
        for o in obs.iter_mut() {
            let z: f64 = rng.sample(StandardNormal);
            *o += z * self.embedding_std;
        }
        obs
    }

    /// Ground-truth value of an item, in (0, 1).
    pub fn true_value(&self, embedding: &[f64]) -> f64 {
        let scale = (self.embedding_size as f64).sqrt();
        sigmoid(dot(&self.value_direction, embedding) / scale)
    }

    /// Value estimate a bidder can form from an observation, in (0, 1).
    pub fn estimated_value(&self, observation: &[f64]) -> f64 {
        let scale = (self.obs_embedding_size as f64).sqrt();
        sigmoid(dot(&self.obs_value_direction, observation) / scale)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
