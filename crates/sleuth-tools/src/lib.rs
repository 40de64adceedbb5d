pub mod builtin;
pub mod registry;

pub use builtin::think::THINK_TOOL;
pub use builtin::web_search::WebSearchTool;
pub use registry::{ToolCatalog, ToolHandler, ToolSet};
