//! The base bundle's `scheduler_config.json`, applied to candle's DDIM sampler.
//!
//! The bundle may name a different sampler class (SD 2.1 base ships PNDM); only the
//! noise schedule and prediction target carry over.

use candle_transformers::models::stable_diffusion::{
    ddim::DDIMSchedulerConfig,
    schedulers::{BetaSchedule, PredictionType, TimestepSpacing},
};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetaScheduleName {
    Linear,
    ScaledLinear,
    #[serde(rename = "squaredcos_cap_v2")]
    SquaredcosCapV2,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTypeName {
    Epsilon,
    VPrediction,
    Sample,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestepSpacingName {
    Leading,
    Linspace,
    Trailing,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    #[serde(rename = "_class_name", default)]
    pub class_name: Option<String>,
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaScheduleName,
    #[serde(default = "default_train_timesteps")]
    pub num_train_timesteps: usize,
    #[serde(default)]
    pub steps_offset: usize,
    #[serde(default = "default_prediction_type")]
    pub prediction_type: PredictionTypeName,
    #[serde(default = "default_timestep_spacing")]
    pub timestep_spacing: TimestepSpacingName,
}

fn default_beta_start() -> f64 {
    0.00085
}
fn default_beta_end() -> f64 {
    0.012
}
fn default_beta_schedule() -> BetaScheduleName {
    BetaScheduleName::ScaledLinear
}
fn default_train_timesteps() -> usize {
    1000
}
fn default_prediction_type() -> PredictionTypeName {
    PredictionTypeName::Epsilon
}
fn default_timestep_spacing() -> TimestepSpacingName {
    TimestepSpacingName::Leading
}

impl SchedulerSettings {
    pub fn to_ddim(&self) -> DDIMSchedulerConfig {
        DDIMSchedulerConfig {
            beta_start: self.beta_start,
            beta_end: self.beta_end,
            beta_schedule: match self.beta_schedule {
                BetaScheduleName::Linear => BetaSchedule::Linear,
                BetaScheduleName::ScaledLinear => BetaSchedule::ScaledLinear,
                BetaScheduleName::SquaredcosCapV2 => BetaSchedule::SquaredcosCapV2,
            },
            eta: 0.,
            steps_offset: self.steps_offset,
            prediction_type: match self.prediction_type {
                PredictionTypeName::Epsilon => PredictionType::Epsilon,
                PredictionTypeName::VPrediction => PredictionType::VPrediction,
                PredictionTypeName::Sample => PredictionType::Sample,
            },
            train_timesteps: self.num_train_timesteps,
            timestep_spacing: match self.timestep_spacing {
                TimestepSpacingName::Leading => TimestepSpacing::Leading,
                TimestepSpacingName::Linspace => TimestepSpacing::Linspace,
                TimestepSpacingName::Trailing => TimestepSpacing::Trailing,
            },
        }
    }
}
