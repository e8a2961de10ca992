pub mod gemini;
pub mod mock;
pub mod reliable;
pub mod self_check;

pub use gemini::{GeminiConfig, GeminiGateway};
pub use mock::{ScriptedGateway, ScriptedReply};
pub use reliable::{ReliableConfig, ReliableGateway};
pub use self_check::run_self_check;
