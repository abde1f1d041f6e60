//! Node and console SDK certificates.

mod http;
mod overlay;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpCertificateClient;
pub use overlay::{copy_ssl_certificates, overlay_lightnode_certificates};

/// Issues certificates from the CA service.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Write `conf/{node.key,node.crt,ca.crt}` under `output_dir`.
    async fn issue_node_certificate(&self, output_dir: &Path, node_id: &str) -> Result<String>;

    /// Write `{sdk.key,sdk.crt,ca.crt}` directly into `conf_dir`.
    async fn issue_console_sdk_certificate(&self, conf_dir: &Path, node_id: &str)
        -> Result<String>;
}
