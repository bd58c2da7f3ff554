/// Span and resource attribute keys for generative-AI client calls.
/// Keep these stable; changing them is a breaking change for dashboards.

// Resource
pub const TELEMETRY_SDK_NAME: &str = "telemetry.sdk.name";
pub const SERVICE_NAME: &str = "service.name";
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";

// Request / baseline
pub const GEN_AI_SYSTEM: &str = "gen_ai.system";
pub const GEN_AI_OPERATION: &str = "gen_ai.operation.name";
pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";
pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const GEN_AI_ENDPOINT: &str = "gen_ai.endpoint";

// Request parameters copied verbatim when the caller set them
pub const GEN_AI_REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";
pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";
pub const GEN_AI_REQUEST_TOP_P: &str = "gen_ai.request.top_p";
pub const GEN_AI_REQUEST_FREQUENCY_PENALTY: &str = "gen_ai.request.frequency_penalty";
pub const GEN_AI_REQUEST_PRESENCE_PENALTY: &str = "gen_ai.request.presence_penalty";
pub const GEN_AI_REQUEST_SEED: &str = "gen_ai.request.seed";

/// Request argument name → attribute key.
pub const REQUEST_PARAMS: [(&str, &str); 6] = [
    ("temperature", GEN_AI_REQUEST_TEMPERATURE),
    ("max_tokens", GEN_AI_REQUEST_MAX_TOKENS),
    ("top_p", GEN_AI_REQUEST_TOP_P),
    ("frequency_penalty", GEN_AI_REQUEST_FREQUENCY_PENALTY),
    ("presence_penalty", GEN_AI_REQUEST_PRESENCE_PENALTY),
    ("seed", GEN_AI_REQUEST_SEED),
];

// Response
pub const GEN_AI_RESPONSE_ID: &str = "gen_ai.response.id";
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const GEN_AI_SYSTEM_FINGERPRINT: &str = "gen_ai.openai.response.system_fingerprint";
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

// Usage
pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const GEN_AI_USAGE_TOTAL_TOKENS: &str = "gen_ai.client.token.usage";
pub const GEN_AI_USAGE_REASONING_TOKENS: &str = "gen_ai.usage.reasoning_tokens";
pub const GEN_AI_USAGE_COST: &str = "gen_ai.usage.cost";

/// Wall-clock time of the wrapped call, in seconds.
pub const GEN_AI_CLIENT_OPERATION_DURATION: &str = "gen_ai.client.operation.duration";

// Message content prefixes; the message position is appended as `.{i}`
pub const GEN_AI_USER_MESSAGE: &str = "gen_ai.user.message";
pub const GEN_AI_SYSTEM_MESSAGE: &str = "gen_ai.system.message";
pub const GEN_AI_ASSISTANT_MESSAGE: &str = "gen_ai.assistant.message";

// Result counts
pub const GEN_AI_EMBEDDING_COUNT: &str = "gen_ai.embedding.count";
pub const GEN_AI_IMAGE_COUNT: &str = "gen_ai.image.count";

// Values
pub const SDK_NAME: &str = "anchor";
pub const SYSTEM_OPENAI: &str = "openai";

/// `{prefix}.{index}` for positional message attributes.
pub fn indexed(prefix: &str, index: usize) -> String {
    format!("{prefix}.{index}")
}
