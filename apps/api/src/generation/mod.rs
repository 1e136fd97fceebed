// Review generation: prompt, provider calls with retry and fallback, streaming
// events, section parsing. All provider calls go through llm_client.

pub mod events;
pub mod handlers;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod retry;
