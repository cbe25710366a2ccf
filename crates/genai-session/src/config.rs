use std::time::Duration;

use crate::errors::SessionError;
use crate::model::CallOptions;
use crate::schema::SchemaContract;

/// Model used when a config does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Output modality the endpoint should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
    Image,
}

/// Recognized sampling and output options.
///
/// Every option defaults to `None`, which leaves the endpoint default in
/// place. Unknown keys are rejected when building from a key/value bag.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub candidate_count: Option<u32>,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default)]
    pub response_modalities: Vec<ResponseModality>,
    pub seed: Option<i64>,
}

impl GenerationParams {
    /// Builds params from a JSON object of passthrough options.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SessionError> {
        serde_json::from_value(value)
            .map_err(|e| SessionError::Config(format!("invalid generation parameters: {e}")))
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequences.push(stop.into());
        self
    }

    pub fn response_modality(mut self, modality: ResponseModality) -> Self {
        self.response_modalities.push(modality);
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn check(&self) -> Result<(), SessionError> {
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(SessionError::Config(format!(
                "temperature must be within 0.0..=2.0, got {t}"
            )));
        }
        if let Some(p) = self.top_p
            && !(0.0..=1.0).contains(&p)
        {
            return Err(SessionError::Config(format!(
                "top_p must be within 0.0..=1.0, got {p}"
            )));
        }
        if self.candidate_count == Some(0) {
            return Err(SessionError::Config(
                "candidate_count must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// A function the model may call, declared with a JSON parameter schema.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
        }
    }

    pub fn parameters(mut self, schema: serde_json::Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Immutable configuration bundle for one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    model: String,
    system_instruction: Option<String>,
    response_schema: Option<SchemaContract>,
    generation: GenerationParams,
    tools: Vec<FunctionDeclaration>,
    call_options: CallOptions,
}

impl SessionConfig {
    /// Starts a builder for the given model id.
    pub fn builder(model: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder {
            model: model.into(),
            system_instruction: None,
            response_schema: None,
            generation: GenerationParams::default(),
            tools: Vec::new(),
            call_options: CallOptions::default(),
        }
    }

    /// Config for the default model with a system instruction.
    pub fn with_system_instruction(instruction: impl Into<String>) -> Self {
        Self {
            system_instruction: Some(instruction.into()),
            ..Self::default()
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn response_schema(&self) -> Option<&SchemaContract> {
        self.response_schema.as_ref()
    }

    pub fn generation(&self) -> &GenerationParams {
        &self.generation
    }

    pub fn tools(&self) -> &[FunctionDeclaration] {
        &self.tools
    }

    pub fn call_options(&self) -> &CallOptions {
        &self.call_options
    }

    /// MIME type the endpoint must answer with; JSON when a contract is set.
    pub fn response_mime_type(&self) -> Option<&'static str> {
        self.response_schema.as_ref().map(|_| "application/json")
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            response_schema: None,
            generation: GenerationParams::default(),
            tools: Vec::new(),
            call_options: CallOptions::default(),
        }
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    model: String,
    system_instruction: Option<String>,
    response_schema: Option<SchemaContract>,
    generation: GenerationParams,
    tools: Vec<FunctionDeclaration>,
    call_options: CallOptions,
}

impl SessionConfigBuilder {
    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Requests JSON output matching `contract`.
    pub fn response_schema(mut self, contract: SchemaContract) -> Self {
        self.response_schema = Some(contract);
        self
    }

    pub fn generation(mut self, params: GenerationParams) -> Self {
        self.generation = params;
        self
    }

    pub fn tool(mut self, declaration: FunctionDeclaration) -> Self {
        self.tools.push(declaration);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.call_options.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SessionConfig, SessionError> {
        if self.model.trim().is_empty() {
            return Err(SessionError::Config("model must not be empty".into()));
        }
        self.generation.check()?;
        if let Some(contract) = &self.response_schema
            && contract.fields.is_empty()
        {
            return Err(SessionError::Config(format!(
                "response schema `{}` declares no fields",
                contract.name
            )));
        }
        Ok(SessionConfig {
            model: self.model,
            system_instruction: self.system_instruction.filter(|s| !s.trim().is_empty()),
            response_schema: self.response_schema,
            generation: self.generation,
            tools: self.tools,
            call_options: self.call_options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    #[test]
    fn default_config_targets_default_model_without_schema() {
        let config = SessionConfig::with_system_instruction("You are a helpful assistant");
        assert_eq!(config.model(), "gemini-2.5-flash");
        assert_eq!(
            config.system_instruction(),
            Some("You are a helpful assistant")
        );
        assert!(config.response_schema().is_none());
        assert_eq!(config.response_mime_type(), None);
    }

    #[test]
    fn schema_switches_response_to_json() {
        let config = SessionConfig::builder("gemini-1.5-pro")
            .response_schema(
                SchemaContract::new("Reply")
                    .field("message", FieldType::String)
                    .field("status", FieldType::String),
            )
            .build()
            .expect("config");
        assert_eq!(config.model(), "gemini-1.5-pro");
        assert_eq!(config.response_mime_type(), Some("application/json"));
    }

    #[test]
    fn unknown_generation_keys_are_rejected() {
        let err = GenerationParams::from_json(json!({"temperature": 0.2, "tempurature": 0.3}))
            .expect_err("typo must be rejected");
        assert!(matches!(err, SessionError::Config(msg) if msg.contains("tempurature")));
    }

    #[test]
    fn known_generation_keys_are_accepted() {
        let params = GenerationParams::from_json(json!({
            "temperature": 0.2,
            "top_k": 40,
            "response_modalities": ["TEXT"]
        }))
        .expect("params");
        assert_eq!(params.top_k, Some(40));
        assert_eq!(params.response_modalities, vec![ResponseModality::Text]);
    }

    #[test]
    fn out_of_range_sampling_fails_build() {
        let err = SessionConfig::builder(DEFAULT_MODEL)
            .generation(GenerationParams::default().temperature(3.5))
            .build()
            .expect_err("temperature too high");
        assert!(matches!(err, SessionError::Config(msg) if msg.contains("temperature")));
    }

    #[test]
    fn empty_model_and_empty_contract_fail_build() {
        assert!(SessionConfig::builder("  ").build().is_err());
        assert!(
            SessionConfig::builder(DEFAULT_MODEL)
                .response_schema(SchemaContract::new("Empty"))
                .build()
                .is_err()
        );
    }

    #[test]
    fn blank_system_instruction_is_dropped() {
        let config = SessionConfig::builder(DEFAULT_MODEL)
            .system_instruction("   ")
            .build()
            .expect("config");
        assert!(config.system_instruction().is_none());
    }
}
