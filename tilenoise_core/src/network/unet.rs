//! The conditional denoising network.
//!
//! A U-shaped ladder of residual blocks with attention at every
//! resolution level, conditioned on the diffusion time globally and on
//! the conditioning field spatially. The ladder is built as an indexed
//! list of stage values from a configuration struct; there is no block
//! hierarchy beyond the three leaf types in [`super::block`].

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use super::attention::{AttentionBlock, AttentionKind};
use super::block::{cat_channels, ResnetBlock, Transition};
use super::embedding::{sinusoidal_time_embedding, ClassEmbedding, CondMlp, TimeMlp};
use super::init::WeightInit;
use super::ops::Conv2d;
use crate::checkpoint::{CheckpointError, Checkpointable};
use crate::conditioning::{encoded_parameter_dim, ConditioningField};
use crate::error::{SynthesisError, SynthesisResult};
use crate::material::NoiseClass;

/// Hyperparameters of the denoising network.
///
/// These describe the pretrained checkpoint and are fixed per process;
/// nothing here varies per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base channel width.
    pub dim: usize,
    /// Width after the initial convolution; defaults to `dim`.
    pub init_dim: Option<usize>,
    /// Output channels; defaults to `channels`.
    pub out_channels: Option<usize>,
    /// Per-level width multipliers.
    pub dim_mults: Vec<usize>,
    /// Image channels (1 for grayscale noise materials).
    pub channels: usize,
    /// Group-norm group count.
    pub groups: usize,
    /// Channel width of the processed conditioning field.
    pub cond_dim: usize,
    /// Number of material classes the embedding table covers.
    pub num_classes: usize,
    /// Positional-encoding frequency levels for material parameters.
    pub pos_enc_levels: usize,
    /// Whether attention stages are present at all.
    pub attention: bool,
    pub attn_heads: usize,
    pub attn_dim_head: usize,
    /// Resolution levels that receive spatial conditioning. Indices
    /// `0..levels` name ladder stages, `levels` the bottleneck and
    /// `levels + 1` the final block. Empty means all of them.
    pub cond_levels: Vec<usize>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            init_dim: None,
            out_channels: None,
            dim_mults: vec![1, 2, 4, 8],
            channels: 1,
            groups: 8,
            cond_dim: 128,
            num_classes: NoiseClass::num_classes(),
            pos_enc_levels: 2,
            attention: true,
            attn_heads: 4,
            attn_dim_head: 32,
            cond_levels: Vec::new(),
        }
    }
}

impl ModelConfig {
    /// A small configuration for fast tests and previews.
    pub fn tiny() -> Self {
        Self {
            dim: 8,
            dim_mults: vec![1, 2],
            groups: 4,
            cond_dim: 16,
            pos_enc_levels: 0,
            attn_heads: 2,
            attn_dim_head: 4,
            ..Self::default()
        }
    }

    pub fn levels(&self) -> usize {
        self.dim_mults.len()
    }

    /// Spatial extent must divide this.
    pub fn downsample_factor(&self) -> usize {
        1 << (self.levels().saturating_sub(1))
    }

    pub fn init_dim(&self) -> usize {
        self.init_dim.unwrap_or(self.dim)
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels.unwrap_or(self.channels)
    }

    pub fn time_dim(&self) -> usize {
        self.dim * 4
    }

    /// Width of the class-embedding component; single-class models carry
    /// no embedding at all.
    pub fn class_embedding_dim(&self) -> usize {
        if self.num_classes > 1 {
            self.dim
        } else {
            0
        }
    }

    /// Channel count the conditioning encoder must produce.
    pub fn conditioning_channels(&self) -> usize {
        encoded_parameter_dim(self.pos_enc_levels) + self.class_embedding_dim()
    }

    /// Ladder widths including the post-init width.
    fn dims(&self) -> Vec<usize> {
        let mut dims = vec![self.init_dim()];
        dims.extend(self.dim_mults.iter().map(|m| self.dim * m));
        dims
    }

    fn conditions_level(&self, level: usize) -> bool {
        self.cond_levels.is_empty() || self.cond_levels.contains(&level)
    }

    /// Structural sanity of the configuration itself.
    pub fn validate(&self) -> Result<(), String> {
        if self.dim == 0 || self.channels == 0 {
            return Err("dim and channels must be positive".into());
        }
        if self.dim % 2 != 0 {
            return Err("dim must be even for the sinusoidal time embedding".into());
        }
        if self.dim % self.groups != 0 {
            return Err(format!(
                "group count {} does not divide base width {}",
                self.groups, self.dim
            ));
        }
        if self.dim_mults.is_empty() || self.dim_mults.iter().any(|&m| m == 0) {
            return Err("dim_mults must be non-empty and positive".into());
        }
        if self.cond_dim == 0 {
            return Err("cond_dim must be positive".into());
        }
        if self.num_classes == 0 {
            return Err("num_classes must be positive".into());
        }
        for width in self.dims() {
            if width % self.groups != 0 {
                return Err(format!(
                    "group count {} does not divide stage width {}",
                    self.groups, width
                ));
            }
        }
        if self.attention && (self.attn_heads == 0 || self.attn_dim_head == 0) {
            return Err("attention head geometry must be positive".into());
        }
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct DownStage {
    block1: ResnetBlock,
    block2: ResnetBlock,
    attn: Option<AttentionBlock>,
    transition: Transition,
}

#[derive(Clone, Serialize, Deserialize)]
struct UpStage {
    block1: ResnetBlock,
    block2: ResnetBlock,
    attn: Option<AttentionBlock>,
    transition: Transition,
}

/// The frozen denoising model.
///
/// Construct once at startup (from a checkpoint or a seed) and share
/// read-only across sampling calls; nothing here is mutated by
/// inference.
#[derive(Clone, Serialize, Deserialize)]
pub struct NoiseUnet {
    config: ModelConfig,
    pub(crate) classes_emb: Option<ClassEmbedding>,
    cond_mlp: CondMlp,
    time_mlp: TimeMlp,
    init_conv: Conv2d,
    downs: Vec<DownStage>,
    mid_block1: ResnetBlock,
    mid_attn: Option<AttentionBlock>,
    mid_block2: ResnetBlock,
    ups: Vec<UpStage>,
    final_block: ResnetBlock,
    final_conv: Conv2d,
}

impl NoiseUnet {
    /// Build a network with deterministic random weights.
    ///
    /// The configuration must pass [`ModelConfig::validate`]; pretrained
    /// deployments load weights through the checkpoint trait instead.
    pub fn from_seed(config: ModelConfig, seed: u64) -> Self {
        debug_assert!(config.validate().is_ok());
        let mut init = WeightInit::new(seed);

        let dims = config.dims();
        let pairs: Vec<(usize, usize)> = dims.windows(2).map(|w| (w[0], w[1])).collect();
        let levels = pairs.len();
        let time_dim = config.time_dim();
        let groups = config.groups;

        let classes_emb = (config.class_embedding_dim() > 0).then(|| ClassEmbedding {
            weight: init.embedding(config.num_classes, config.dim),
        });

        let cond_mlp = CondMlp {
            lin1: init.linear(config.cond_dim, config.conditioning_channels()),
            lin2: init.linear(config.cond_dim, config.cond_dim),
        };
        let time_mlp = TimeMlp {
            lin1: init.linear(time_dim, config.dim),
            lin2: init.linear(time_dim, time_dim),
        };
        let init_conv = init.conv(config.init_dim(), config.channels, 7);

        let maybe_cond = |config: &ModelConfig, level: usize| {
            config.conditions_level(level).then_some(config.cond_dim)
        };

        let mut downs = Vec::with_capacity(levels);
        for (level, &(dim_in, dim_out)) in pairs.iter().enumerate() {
            let is_last = level == levels - 1;
            let cond = maybe_cond(&config, level);
            downs.push(DownStage {
                block1: ResnetBlock::new(&mut init, dim_in, dim_in, time_dim, groups, cond),
                block2: ResnetBlock::new(&mut init, dim_in, dim_in, time_dim, groups, cond),
                attn: config.attention.then(|| AttentionBlock {
                    norm: super::ops::ChanLayerNorm::new(dim_in),
                    kind: AttentionKind::Linear(init.linear_attention(
                        dim_in,
                        config.attn_heads,
                        config.attn_dim_head,
                    )),
                }),
                transition: if is_last {
                    Transition::Keep(init.conv(dim_out, dim_in, 3))
                } else {
                    Transition::Down(init.conv(dim_out, dim_in * 4, 1))
                },
            });
        }

        let mid_dim = *dims.last().expect("ladder has at least one width");
        let mid_cond = maybe_cond(&config, levels);
        let mid_block1 = ResnetBlock::new(&mut init, mid_dim, mid_dim, time_dim, groups, mid_cond);
        let mid_attn = config.attention.then(|| AttentionBlock {
            norm: super::ops::ChanLayerNorm::new(mid_dim),
            kind: AttentionKind::Full(init.full_attention(
                mid_dim,
                config.attn_heads,
                config.attn_dim_head,
            )),
        });
        let mid_block2 = ResnetBlock::new(&mut init, mid_dim, mid_dim, time_dim, groups, mid_cond);

        let mut ups = Vec::with_capacity(levels);
        for (i, &(dim_in, dim_out)) in pairs.iter().rev().enumerate() {
            let is_last = i == levels - 1;
            let cond = maybe_cond(&config, levels - i - 1);
            ups.push(UpStage {
                block1: ResnetBlock::new(
                    &mut init,
                    dim_out + dim_in,
                    dim_out,
                    time_dim,
                    groups,
                    cond,
                ),
                block2: ResnetBlock::new(
                    &mut init,
                    dim_out + dim_in,
                    dim_out,
                    time_dim,
                    groups,
                    cond,
                ),
                attn: config.attention.then(|| AttentionBlock {
                    norm: super::ops::ChanLayerNorm::new(dim_out),
                    kind: AttentionKind::Linear(init.linear_attention(
                        dim_out,
                        config.attn_heads,
                        config.attn_dim_head,
                    )),
                }),
                transition: if is_last {
                    Transition::Keep(init.conv(dim_in, dim_out, 3))
                } else {
                    Transition::Up(init.conv(dim_in, dim_out, 3))
                },
            });
        }

        let final_cond = maybe_cond(&config, levels + 1);
        let final_block = ResnetBlock::new(
            &mut init,
            config.init_dim() * 2,
            config.dim,
            time_dim,
            groups,
            final_cond,
        );
        let final_conv = init.conv(config.out_channels(), config.dim, 1);

        Self {
            config,
            classes_emb,
            cond_mlp,
            time_mlp,
            init_conv,
            downs,
            mid_block1,
            mid_attn,
            mid_block2,
            ups,
            final_block,
            final_conv,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Embedding row for a class, empty for single-class models.
    pub fn class_embedding(&self, class: NoiseClass) -> ndarray::ArrayView1<'_, f32> {
        match &self.classes_emb {
            Some(table) => table.row(class.index()),
            None => ndarray::ArrayView1::from(&[][..]),
        }
    }

    fn validate_inputs(
        &self,
        x: &Array3<f32>,
        field: &ConditioningField,
    ) -> SynthesisResult<()> {
        let (c, h, w) = x.dim();
        if c != self.config.channels {
            return Err(SynthesisError::shape_mismatch(
                "network input channels",
                vec![self.config.channels],
                vec![c],
            ));
        }
        let expected_cond = self.config.conditioning_channels();
        if field.channels() != expected_cond {
            return Err(SynthesisError::shape_mismatch(
                "conditioning field channels",
                vec![expected_cond],
                vec![field.channels()],
            ));
        }
        if (field.height(), field.width()) != (h, w) {
            return Err(SynthesisError::shape_mismatch(
                "conditioning field resolution",
                vec![h, w],
                vec![field.height(), field.width()],
            ));
        }
        let factor = self.config.downsample_factor();
        if h == 0 || w == 0 || h % factor != 0 || w % factor != 0 {
            return Err(SynthesisError::shape_mismatch(
                "spatial resolution (must be a positive multiple of the downsampling factor)",
                vec![factor],
                vec![h, w],
            ));
        }
        Ok(())
    }

    /// Predict the noise residual for the state `x` at diffusion time
    /// `timestep`, under the given conditioning field.
    ///
    /// Shape contracts are checked before any computation; inference
    /// itself cannot fail.
    pub fn predict(
        &self,
        x: &Array3<f32>,
        timestep: usize,
        field: &ConditioningField,
    ) -> SynthesisResult<Array3<f32>> {
        self.validate_inputs(x, field)?;

        let time_emb = self
            .time_mlp
            .forward(&sinusoidal_time_embedding(timestep as f32, self.config.dim));
        let cond = self.cond_mlp.forward_pixels(field.as_array());
        let levels = self.downs.len();
        let cond_at = |level: usize| self.config.conditions_level(level).then_some(&cond);

        let mut state = self.init_conv.forward(x);
        let residual = state.clone();
        let mut skips: Vec<Array3<f32>> = Vec::with_capacity(levels * 2);

        for (level, stage) in self.downs.iter().enumerate() {
            let c = cond_at(level);
            state = stage.block1.forward(&state, &time_emb, c);
            skips.push(state.clone());
            state = stage.block2.forward(&state, &time_emb, c);
            if let Some(attn) = &stage.attn {
                state = attn.forward(&state);
            }
            skips.push(state.clone());
            state = stage.transition.forward(&state);
        }

        let c = cond_at(levels);
        state = self.mid_block1.forward(&state, &time_emb, c);
        if let Some(attn) = &self.mid_attn {
            state = attn.forward(&state);
        }
        state = self.mid_block2.forward(&state, &time_emb, c);

        for (i, stage) in self.ups.iter().enumerate() {
            let c = cond_at(levels - i - 1);
            let skip = skips.pop().expect("skip stack balanced with ladder");
            state = stage.block1.forward(&cat_channels(&state, &skip), &time_emb, c);
            let skip = skips.pop().expect("skip stack balanced with ladder");
            state = stage.block2.forward(&cat_channels(&state, &skip), &time_emb, c);
            if let Some(attn) = &stage.attn {
                state = attn.forward(&state);
            }
            state = stage.transition.forward(&state);
        }

        let c = cond_at(levels + 1);
        state = self
            .final_block
            .forward(&cat_channels(&state, &residual), &time_emb, c);
        Ok(self.final_conv.forward(&state))
    }
}

const MODEL_CHECKPOINT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct NoiseUnetCheckpoint {
    version: u32,
    model: NoiseUnet,
}

impl NoiseUnet {
    /// Consistency of deserialized weights against their own config.
    fn validate_structure(&self) -> Result<(), String> {
        self.config.validate()?;

        let expected_init = (self.config.init_dim(), self.config.channels, 7, 7);
        if self.init_conv.weight.dim() != expected_init {
            return Err(format!(
                "init conv shape {:?} does not match config {:?}",
                self.init_conv.weight.dim(),
                expected_init
            ));
        }
        if self.downs.len() != self.config.levels() || self.ups.len() != self.config.levels() {
            return Err(format!(
                "ladder depth {}/{} does not match {} configured levels",
                self.downs.len(),
                self.ups.len(),
                self.config.levels()
            ));
        }
        if self.final_conv.out_channels() != self.config.out_channels() {
            return Err("final conv output width does not match config".into());
        }
        let has_embedding = self.classes_emb.is_some();
        if has_embedding != (self.config.class_embedding_dim() > 0) {
            return Err("class embedding presence does not match config".into());
        }
        if self.cond_mlp.lin1.weight.dim().1 != self.config.conditioning_channels() {
            return Err("conditioning MLP input width does not match config".into());
        }
        Ok(())
    }
}

impl Checkpointable for NoiseUnet {
    fn save_checkpoint<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let snapshot = NoiseUnetCheckpoint {
            version: MODEL_CHECKPOINT_VERSION,
            model: self.clone(),
        };
        Self::write_snapshot(&snapshot, path)
    }

    fn load_checkpoint<P: AsRef<std::path::Path>>(path: P) -> Result<Self, CheckpointError> {
        let snapshot: NoiseUnetCheckpoint = Self::read_snapshot(path)?;
        if snapshot.version != MODEL_CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: MODEL_CHECKPOINT_VERSION,
                found: snapshot.version,
            });
        }
        snapshot
            .model
            .validate_structure()
            .map_err(CheckpointError::InvalidFormat)?;
        Ok(snapshot.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioning::encode_conditioning;
    use crate::material::MaterialSpec;
    use ndarray::Zip;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn tiny_model() -> NoiseUnet {
        NoiseUnet::from_seed(ModelConfig::tiny(), 42)
    }

    fn noise(c: usize, h: usize, w: usize, seed: u64) -> Array3<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array3::from_shape_simple_fn((c, h, w), || rng.sample::<f32, _>(StandardNormal))
    }

    fn field_for(model: &NoiseUnet, h: usize, w: usize) -> ConditioningField {
        let spec = MaterialSpec::with_defaults(NoiseClass::Perlin);
        encode_conditioning(
            &spec,
            h,
            w,
            model.class_embedding(NoiseClass::Perlin),
            model.config().pos_enc_levels,
        )
        .unwrap()
    }

    fn roll(x: &Array3<f32>, dy: usize, dx: usize) -> Array3<f32> {
        let (c, h, w) = x.dim();
        let mut out = Array3::<f32>::zeros((c, h, w));
        Zip::indexed(&mut out).for_each(|(ch, y, x0), v| {
            *v = x[[ch, (y + h - dy) % h, (x0 + w - dx) % w]];
        });
        out
    }

    #[test]
    fn test_predict_output_shape() {
        let model = tiny_model();
        let x = noise(1, 16, 16, 7);
        let field = field_for(&model, 16, 16);
        let out = model.predict(&x, 500, &field).unwrap();
        assert_eq!(out.dim(), (1, 16, 16));
    }

    #[test]
    fn test_predict_is_deterministic() {
        let model = tiny_model();
        let x = noise(1, 8, 8, 7);
        let field = field_for(&model, 8, 8);
        let a = model.predict(&x, 100, &field).unwrap();
        let b = model.predict(&x, 100, &field).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_rejects_wrong_channels() {
        let model = tiny_model();
        let x = noise(3, 16, 16, 7);
        let field = field_for(&model, 16, 16);
        let err = model.predict(&x, 10, &field).unwrap_err();
        assert!(matches!(err, SynthesisError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_predict_rejects_indivisible_resolution() {
        let model = tiny_model();
        let x = noise(1, 9, 9, 7);
        let field = field_for(&model, 9, 9);
        let err = model.predict(&x, 10, &field).unwrap_err();
        assert!(matches!(err, SynthesisError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_predict_rejects_field_resolution_mismatch() {
        let model = tiny_model();
        let x = noise(1, 16, 16, 7);
        let field = field_for(&model, 8, 8);
        let err = model.predict(&x, 10, &field).unwrap_err();
        assert!(matches!(err, SynthesisError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_timestep_changes_prediction() {
        let model = tiny_model();
        let x = noise(1, 8, 8, 7);
        let field = field_for(&model, 8, 8);
        let a = model.predict(&x, 10, &field).unwrap();
        let b = model.predict(&x, 900, &field).unwrap();
        let diff: f32 = a.iter().zip(b.iter()).map(|(p, q)| (p - q).abs()).sum();
        assert!(diff > 1e-4);
    }

    #[test]
    fn test_network_is_toroidally_shift_equivariant() {
        // Rolling the input and conditioning by an even offset must roll
        // the output identically; zero padding anywhere would break this.
        let model = tiny_model();
        let x = noise(1, 16, 16, 3);
        let field = field_for(&model, 16, 16);

        let base = model.predict(&x, 250, &field).unwrap();
        let rolled_in = model.predict(&roll(&x, 4, 6), 250, &field).unwrap();
        let rolled_out = roll(&base, 4, 6);

        for (a, b) in rolled_in.iter().zip(rolled_out.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_checkpoint_roundtrip_preserves_predictions() {
        let model = tiny_model();
        let path = std::env::temp_dir().join(format!(
            "tilenoise-unet-checkpoint-{}.bin",
            std::process::id()
        ));
        model.save_checkpoint(&path).unwrap();
        let restored = NoiseUnet::load_checkpoint(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let x = noise(1, 8, 8, 7);
        let field = field_for(&model, 8, 8);
        assert_eq!(
            model.predict(&x, 50, &field).unwrap(),
            restored.predict(&x, 50, &field).unwrap()
        );
    }

    #[test]
    fn test_checkpoint_rejects_foreign_version() {
        let model = tiny_model();
        let path = std::env::temp_dir().join(format!(
            "tilenoise-unet-badversion-{}.bin",
            std::process::id()
        ));
        let snapshot = NoiseUnetCheckpoint {
            version: MODEL_CHECKPOINT_VERSION + 1,
            model: model.clone(),
        };
        NoiseUnet::write_snapshot(&snapshot, &path).unwrap();
        let result = NoiseUnet::load_checkpoint(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            result,
            Err(CheckpointError::VersionMismatch {
                expected: MODEL_CHECKPOINT_VERSION,
                found,
            }) if found == MODEL_CHECKPOINT_VERSION + 1
        ));
    }

    #[test]
    fn test_conditioning_field_steers_prediction() {
        let model = tiny_model();
        let x = noise(1, 8, 8, 7);
        let field_a = field_for(&model, 8, 8);
        let spec_b = MaterialSpec::with_defaults(NoiseClass::Voronoi);
        let field_b = encode_conditioning(
            &spec_b,
            8,
            8,
            model.class_embedding(NoiseClass::Voronoi),
            model.config().pos_enc_levels,
        )
        .unwrap();

        let a = model.predict(&x, 100, &field_a).unwrap();
        let b = model.predict(&x, 100, &field_b).unwrap();
        let diff: f32 = a.iter().zip(b.iter()).map(|(p, q)| (p - q).abs()).sum();
        assert!(diff > 1e-4);
    }
}
