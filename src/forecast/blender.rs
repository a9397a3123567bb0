use crate::config::BlendConfig;
use crate::types::{clamp_probability, FeedbackAggregate};

/// Stateless combination of a base forecast with the feedback aggregate.
#[derive(Debug, Clone)]
pub struct ForecastBlender {
    cfg: BlendConfig,
}

impl ForecastBlender {
    pub fn new(cfg: BlendConfig) -> Self {
        Self { cfg }
    }

    /// True when the aggregate is allowed to move the published estimate.
    pub fn passes_gate(&self, aggregate: &FeedbackAggregate) -> bool {
        self.cfg.use_feedback && aggregate.vote_count >= self.cfg.min_feedback_count
    }

    pub fn blend(&self, base_probability: f64, aggregate: &FeedbackAggregate) -> f64 {
        blend(base_probability, aggregate, &self.cfg)
    }
}

/// `(1 − w)·base + w·score` once enough votes exist, otherwise `base`.
pub fn blend(base_probability: f64, aggregate: &FeedbackAggregate, cfg: &BlendConfig) -> f64 {
    let base = clamp_probability(base_probability);
    if !cfg.use_feedback || aggregate.vote_count < cfg.min_feedback_count {
        return base;
    }
    let w = cfg.feedback_weight.clamp(0.0, 1.0);
    clamp_probability((1.0 - w) * base + w * aggregate.weighted_agreement_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedbackPreset;

    fn agg(vote_count: usize, score: f64) -> FeedbackAggregate {
        FeedbackAggregate { vote_count, weighted_agreement_score: score }
    }

    #[test]
    fn unanimous_agreement_scenario() {
        let blender = ForecastBlender::new(BlendConfig::default());
        let final_p = blender.blend(0.6, &agg(3, 1.0));
        assert!((final_p - 0.72).abs() < 1e-12, "got {final_p}");
    }

    #[test]
    fn below_gate_returns_base_unchanged() {
        let cfg = BlendConfig::default();
        for score in [0.0, 0.5, 1.0] {
            let p = blend(0.42, &agg(cfg.min_feedback_count - 1, score), &cfg);
            assert_eq!(p, 0.42);
        }
    }

    #[test]
    fn disabled_feedback_returns_base() {
        let cfg = BlendConfig { use_feedback: false, ..BlendConfig::default() };
        assert_eq!(blend(0.3, &agg(50, 1.0), &cfg), 0.3);
    }

    #[test]
    fn blending_is_idempotent() {
        let blender = ForecastBlender::new(BlendConfig::preset(FeedbackPreset::Cautious));
        let a = agg(7, 0.83);
        assert_eq!(blender.blend(0.27, &a), blender.blend(0.27, &a));
    }

    #[test]
    fn cautious_preset_moves_less() {
        let standard = blend(0.5, &agg(3, 0.0), &BlendConfig::preset(FeedbackPreset::Standard));
        let cautious = blend(0.5, &agg(3, 0.0), &BlendConfig::preset(FeedbackPreset::Cautious));
        assert!((standard - 0.35).abs() < 1e-12);
        assert!((cautious - 0.45).abs() < 1e-12);
    }
}
