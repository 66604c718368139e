use thiserror::Error;

#[derive(Debug, Error)]
pub enum NewsError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed answered with a non-2xx status.
    #[error("news feed returned HTTP {0}")]
    Status(u16),

    /// The feed body is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
}
