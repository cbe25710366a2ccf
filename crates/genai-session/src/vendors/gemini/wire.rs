//! Request-side JSON shapes shared by the REST and live clients.

use serde::Serialize;

use crate::config::{FunctionDeclaration, GenerationParams, ResponseModality};
use crate::content::Message;
use crate::provider::ProviderRequest;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest<'a> {
    pub contents: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool<'a>>,
}

impl<'a> GenerateContentRequest<'a> {
    pub fn from_request(req: &'a ProviderRequest) -> Self {
        Self {
            contents: &req.contents,
            system_instruction: SystemInstruction::new(req.system_instruction.as_deref()),
            generation_config: GenerationConfig::new(
                &req.generation,
                req.response_mime_type.as_deref(),
                req.response_schema.as_ref(),
            ),
            tools: Tool::from_declarations(&req.tools),
        }
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct SystemInstruction<'a> {
    parts: [TextPart<'a>; 1],
}

impl<'a> SystemInstruction<'a> {
    pub fn new(text: Option<&'a str>) -> Option<Self> {
        text.map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| Self {
                parts: [TextPart { text }],
            })
    }
}

#[derive(Serialize, Debug)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    stop_sequences: &'a [String],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    response_modalities: &'a [ResponseModality],
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a serde_json::Value>,
}

impl<'a> GenerationConfig<'a> {
    /// Returns `None` when nothing would be sent.
    pub fn new(
        params: &'a GenerationParams,
        response_mime_type: Option<&'a str>,
        response_schema: Option<&'a serde_json::Value>,
    ) -> Option<Self> {
        let config = Self {
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            max_output_tokens: params.max_output_tokens,
            candidate_count: params.candidate_count,
            stop_sequences: &params.stop_sequences,
            response_modalities: &params.response_modalities,
            seed: params.seed,
            response_mime_type,
            response_schema,
        };
        (*params != GenerationParams::default()
            || response_mime_type.is_some()
            || response_schema.is_some())
        .then_some(config)
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tool<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

impl<'a> Tool<'a> {
    pub fn from_declarations(declarations: &'a [FunctionDeclaration]) -> Vec<Self> {
        if declarations.is_empty() {
            Vec::new()
        } else {
            vec![Self {
                function_declarations: declarations,
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentPart;
    use crate::model::CallOptions;
    use serde_json::json;

    fn request() -> ProviderRequest {
        ProviderRequest {
            call_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            model: "gemini-2.5-flash".into(),
            system_instruction: None,
            contents: vec![Message::user_text("hello")],
            generation: GenerationParams::default(),
            response_schema: None,
            response_mime_type: None,
            tools: Vec::new(),
            options: CallOptions::default(),
        }
    }

    #[test]
    fn minimal_request_only_carries_contents() {
        let req = request();
        let body = serde_json::to_value(GenerateContentRequest::from_request(&req)).expect("json");
        assert_eq!(
            body,
            json!({"contents": [{"role": "user", "parts": [{"text": "hello"}]}]})
        );
    }

    #[test]
    fn full_request_uses_endpoint_field_names() {
        let mut req = request();
        req.system_instruction = Some("be brief".into());
        req.generation = GenerationParams::default()
            .temperature(0.5)
            .max_output_tokens(64)
            .stop_sequence("END");
        req.response_mime_type = Some("application/json".into());
        req.response_schema = Some(json!({"type": "OBJECT"}));
        req.tools = vec![FunctionDeclaration::new("lookup", "Finds things")];
        req.contents = vec![Message::new(
            crate::content::Role::User,
            vec![
                ContentPart::text("describe"),
                ContentPart::blob(vec![1u8, 2, 3], "image/png"),
            ],
        )];

        let body = serde_json::to_value(GenerateContentRequest::from_request(&req)).expect("json");
        assert_eq!(body["systemInstruction"], json!({"parts": [{"text": "be brief"}]}));
        assert_eq!(body["generationConfig"]["temperature"], json!(0.5));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], json!(64));
        assert_eq!(body["generationConfig"]["stopSequences"], json!(["END"]));
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
        assert_eq!(
            body["generationConfig"]["responseSchema"],
            json!({"type": "OBJECT"})
        );
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            json!("lookup")
        );
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            json!("image/png")
        );
    }
}
