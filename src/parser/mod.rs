mod boundary;
mod multipart;
#[cfg(test)]
mod tests;

pub use boundary::{boundary_from_content_type, is_multipart_replace};
pub use multipart::{FrameEvent, MultipartParser, ParserLimits};
