pub mod cache;
pub mod discovery;
pub mod extractor;
pub mod llm;
pub mod robots;
pub mod session;

pub use cache::ResponseCache;
pub use discovery::SourceDiscoverer;
pub use extractor::HtmlExtractor;
pub use llm::OpenAiClient;
pub use session::HttpSession;
