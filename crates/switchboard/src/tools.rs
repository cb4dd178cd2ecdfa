pub mod dispatch;
pub mod handler;
pub mod http;

pub use dispatch::ToolDispatch;
pub use handler::{ToolHandler, ToolOutput, ToolProvider};
pub use http::HttpToolProvider;
