pub mod error;
pub mod sparql_text;
pub mod string_ext;

pub use error::{AgentError, AgentResult};
pub use string_ext::StringExt;
