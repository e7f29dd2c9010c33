//! Branch-on-uncertainty decision rule

use crate::config::GenerationSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Commit the top-1 token without asking.
    Advance,
    /// Suspend and offer the candidates to the operator.
    Branch,
}

/// Branch when the top-1 probability falls below the threshold.
pub fn decide(top1_probability: f32, threshold: f32) -> Decision {
    if top1_probability < threshold {
        Decision::Branch
    } else {
        Decision::Advance
    }
}

/// Decaying confidence bar.
///
/// A branch resets the threshold to its default; every auto-advance raises
/// it by a fixed increment with no upper cap, so long unattended runs demand
/// more and more confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchPolicy {
    default_threshold: f32,
    increment: f32,
}

impl BranchPolicy {
    pub fn new(default_threshold: f32, increment: f32) -> Self {
        Self {
            default_threshold,
            increment,
        }
    }

    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self::new(settings.default_threshold, settings.threshold_increment)
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    pub fn decide(&self, top1_probability: f32, threshold: f32) -> Decision {
        decide(top1_probability, threshold)
    }

    pub fn next_threshold(&self, decision: Decision, current: f32) -> f32 {
        match decision {
            Decision::Branch => self.default_threshold,
            Decision::Advance => current + self.increment,
        }
    }
}

impl Default for BranchPolicy {
    fn default() -> Self {
        Self::from_settings(&GenerationSettings::default())
    }
}
