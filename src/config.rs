//! Tunables for a decomposition run.

use crate::decomp_error::DecompError;

/// Reading group size used when nothing else is configured.
pub const DEFAULT_READING_GROUP_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Upper bound on the number of ranks that open the geometry body.
    pub reading_group_size: usize,
    /// Keep rank 0 out of the decomposition (it then owns no sites).
    pub reserve_io_rank: bool,
    /// Run the cross-rank consistency checks and log what they find.
    pub validate: bool,
    /// Allowed relative load imbalance handed to the partitioner.
    pub imbalance_tolerance: f64,
    /// Maximum number of boundary refinement sweeps in [`KwayRefiner`].
    ///
    /// [`KwayRefiner`]: crate::partitioning::refine::KwayRefiner
    pub refine_passes: usize,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            reading_group_size: DEFAULT_READING_GROUP_SIZE,
            reserve_io_rank: false,
            validate: false,
            imbalance_tolerance: 0.001,
            refine_passes: 8,
        }
    }
}

impl DecompositionConfig {
    pub fn validate(&self) -> Result<(), DecompError> {
        if self.reading_group_size == 0 {
            return Err(DecompError::InvalidConfig(
                "reading_group_size must be at least 1".into(),
            ));
        }
        if !(self.imbalance_tolerance > 0.0) || !self.imbalance_tolerance.is_finite() {
            return Err(DecompError::InvalidConfig(format!(
                "imbalance_tolerance must be positive and finite, got {}",
                self.imbalance_tolerance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = DecompositionConfig::default();
        assert_eq!(cfg.reading_group_size, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_group_and_bad_tolerance() {
        let cfg = DecompositionConfig {
            reading_group_size: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DecompError::InvalidConfig(_))));
        let cfg = DecompositionConfig {
            imbalance_tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: DecompositionConfig =
            serde_json::from_str(r#"{ "reserve_io_rank": true }"#).unwrap();
        assert!(cfg.reserve_io_rank);
        assert_eq!(cfg.refine_passes, 8);
    }
}
