pub mod errors;
pub mod gateway;
pub mod history;
pub mod ids;
pub mod prompt;
pub mod turn;

pub use errors::{ChatError, FailureCause, GatewayError};
pub use gateway::{validate_conversation, ModelGateway};
pub use history::{History, HISTORY_LIMIT};
pub use ids::ConnectionId;
pub use prompt::PromptPayload;
pub use turn::{Role, Turn};
