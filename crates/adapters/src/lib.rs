mod endpoint;
mod error;
mod image;
mod llm;
mod pdf;
mod retry;

pub use endpoint::{join_endpoint, normalize_base_url, resolve_base_url};
pub use error::AdapterError;
pub use image::{create_image_adapter, create_image_adapter_from_profile};
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile};
pub use pdf::{outline, parse_blocks, wrap_text, Block, MarkdownPdfRenderer};
pub use retry::{call_with_retry, RetryConfig};
