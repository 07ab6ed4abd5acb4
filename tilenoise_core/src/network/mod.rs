//! The conditional denoising network and its building blocks.
//!
//! The network is assembled from a small set of composable value types
//! (conv, norm, attention, residual block) configured by
//! [`ModelConfig`]; the down/up ladder is a built, indexed list of stage
//! values rather than a type hierarchy. Every spatial operator wraps
//! around the image borders so outputs tile seamlessly.

pub mod attention;
pub mod block;
pub mod embedding;
pub mod init;
pub mod ops;
pub mod unet;

pub use init::WeightInit;
pub use unet::{ModelConfig, NoiseUnet};
