mod library;
mod prompt;
mod template;
mod value;

pub use library::TemplateLibrary;
pub use prompt::{WorkflowNode, WorkflowPrompt};
pub use template::{ParamType, TemplateError, TemplateParameter, WorkflowTemplate};
pub use value::{InputValue, NodeRef};
