pub mod gemini;
pub mod kiro;
pub mod openai;

pub use gemini::{
    Candidate, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    ModelQuotaInfo, ModelsListResponse, Part, SseEnvelope,
};
pub use kiro::{AssistantEvent, ConversationState, Tool, ToolResult, ToolSpecification};
pub use openai::ChatCompletionsRequest;
