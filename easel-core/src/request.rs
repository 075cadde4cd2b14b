use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_PROMPT_LEN: usize = 1000;
pub const MAX_STEPS: u32 = 500;
pub const MAX_SCALE: f64 = 50.0;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub steps: u32,
    pub scale: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidRequest {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("prompt must be at most {max} characters, got {0}", max = MAX_PROMPT_LEN)]
    PromptTooLong(usize),
    #[error("steps must be between 1 and {max}, got {0}", max = MAX_STEPS)]
    Steps(u32),
    #[error("scale must be a finite number in (0, {max}], got {0}", max = MAX_SCALE)]
    Scale(f64),
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), InvalidRequest> {
        if self.prompt.trim().is_empty() {
            return Err(InvalidRequest::EmptyPrompt);
        }
        let len = self.prompt.chars().count();
        if len > MAX_PROMPT_LEN {
            return Err(InvalidRequest::PromptTooLong(len));
        }
        if !(1..=MAX_STEPS).contains(&self.steps) {
            return Err(InvalidRequest::Steps(self.steps));
        }
        // NaN fails both comparisons.
        if !(self.scale > 0.0 && self.scale <= MAX_SCALE) {
            return Err(InvalidRequest::Scale(self.scale));
        }
        Ok(())
    }

    pub fn filename(&self) -> String {
        crate::output_filename(&self.prompt, self.steps as usize, self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str, steps: u32, scale: f64) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            steps,
            scale,
        }
    }

    #[test]
    fn accepts_typical_values() {
        assert_eq!(request("a red fox in snow", 20, 7.5).validate(), Ok(()));
        assert_eq!(request("x", 1, 0.1).validate(), Ok(()));
        assert_eq!(request("x", MAX_STEPS, MAX_SCALE).validate(), Ok(()));
    }

    #[test]
    fn rejects_blank_prompts() {
        assert_eq!(request("", 20, 7.5).validate(), Err(InvalidRequest::EmptyPrompt));
        assert_eq!(request("  \n", 20, 7.5).validate(), Err(InvalidRequest::EmptyPrompt));
    }

    #[test]
    fn rejects_huge_prompts() {
        let prompt = "a".repeat(MAX_PROMPT_LEN + 1);
        assert_eq!(
            request(&prompt, 20, 7.5).validate(),
            Err(InvalidRequest::PromptTooLong(MAX_PROMPT_LEN + 1))
        );
    }

    #[test]
    fn rejects_out_of_range_steps() {
        assert_eq!(request("x", 0, 7.5).validate(), Err(InvalidRequest::Steps(0)));
        assert_eq!(
            request("x", MAX_STEPS + 1, 7.5).validate(),
            Err(InvalidRequest::Steps(MAX_STEPS + 1))
        );
    }

    #[test]
    fn rejects_out_of_range_scale() {
        for scale in [0.0, -1.0, MAX_SCALE + 0.5, f64::INFINITY] {
            assert_eq!(
                request("x", 20, scale).validate(),
                Err(InvalidRequest::Scale(scale))
            );
        }
        assert!(request("x", 20, f64::NAN).validate().is_err());
    }

    #[test]
    fn negative_steps_do_not_deserialize() {
        let json = r#"{"prompt": "x", "steps": -3, "scale": 7.5}"#;
        assert!(serde_json::from_str::<GenerationRequest>(json).is_err());
    }

    #[test]
    fn filename_follows_request() {
        assert_eq!(
            request("a red fox in snow", 20, 7.5).filename(),
            "a_red_fox_in_snow_20_7.5.png"
        );
    }
}
