pub mod chat;

pub use chat::{
    ChatImageInput, ChatMessage, ChatRequest, ChatResponse, ChatStreamEvent, QuestionAnalysis,
    ResponseStrategy, SearchRequest, SearchResultItem, SessionDetail, SessionId, SessionSummary,
    SourceCitation,
};
