//! Challenge/response CSR issuance against the CA endpoints.

use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SigningKey as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::CertificateIssuer;
use crate::error::{AppError, Result};
use crate::lightnode::fsutil::restrict_private_key;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ChallengeRequest<'a> {
    original_node_id: &'a str,
    public_key: String,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Serialize)]
struct IssueRequest<'a> {
    original_node_id: &'a str,
    csr: String,
    challenge: &'a str,
    signature: String,
}

#[derive(Deserialize)]
struct IssueResponse {
    certificate: String,
    ca_bundle: String,
}

/// File names and CSR subject for one kind of certificate.
struct CertTarget<'a> {
    common_name: String,
    key_file: &'a str,
    cert_file: &'a str,
}

/// Locally generated key material for one issuance.
pub(crate) struct CsrMaterial {
    key_pair: KeyPair,
}

impl CsrMaterial {
    pub(crate) fn generate() -> Result<Self> {
        let key_pair = KeyPair::generate()
            .map_err(|e| AppError::certificate(format!("生成私钥失败: {}", e)))?;
        Ok(Self { key_pair })
    }

    /// PKCS#8 PEM private key.
    pub(crate) fn private_key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// Base64 of the SubjectPublicKeyInfo PEM.
    pub(crate) fn public_key_b64(&self) -> String {
        STANDARD.encode(self.key_pair.public_key_pem())
    }

    /// Base64 of the ECDSA-SHA256 signature over `challenge`.
    pub(crate) fn sign_challenge_b64(&self, challenge: &str) -> Result<String> {
        let signature = self
            .key_pair
            .sign(challenge.as_bytes())
            .map_err(|e| AppError::certificate(format!("签名挑战失败: {}", e)))?;
        Ok(STANDARD.encode(signature))
    }

    /// Base64 of a PEM CSR with the given common name.
    pub(crate) fn csr_b64(&self, common_name: &str) -> Result<String> {
        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| AppError::certificate(e.to_string()))?;
        let mut name = DistinguishedName::new();
        name.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = name;

        let pem = params
            .serialize_request(&self.key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| AppError::certificate(format!("生成证书签名请求失败: {}", e)))?;
        Ok(STANDARD.encode(pem))
    }
}

/// Certificate issuer backed by `{base}/ca/request-challenge` and
/// `{base}/ca/issue-certificate`.
pub struct HttpCertificateClient {
    base_url: String,
    client: Client,
}

impl HttpCertificateClient {
    pub fn new(api_base_url: &str) -> Self {
        Self::with_client(api_base_url, Client::new())
    }

    pub fn with_client(api_base_url: &str, client: Client) -> Self {
        Self {
            base_url: api_base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::network_with_url(&url, format!("网络请求失败: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = body.trim();
            let detail = if body.is_empty() {
                format!("网络请求失败: {}", status)
            } else {
                format!("网络请求失败: {} {}", status, body)
            };
            return Err(AppError::network_with_url(&url, detail));
        }

        resp.json::<R>()
            .await
            .map_err(|e| AppError::network_with_url(&url, format!("响应格式错误: {}", e)))
    }

    async fn issue(&self, conf_dir: &Path, node_id: &str, target: CertTarget<'_>) -> Result<()> {
        fs::create_dir_all(conf_dir)
            .map_err(|e| AppError::io(format!("创建证书目录失败: {}", e)))?;

        let material = CsrMaterial::generate()?;
        let key_path = conf_dir.join(target.key_file);
        fs::write(&key_path, material.private_key_pem())
            .map_err(|e| AppError::io(format!("写入私钥失败: {}", e)))?;
        restrict_private_key(&key_path);

        let challenge: ChallengeResponse = self
            .post_json(
                "/ca/request-challenge",
                &ChallengeRequest {
                    original_node_id: node_id,
                    public_key: material.public_key_b64(),
                },
            )
            .await?;
        log::debug!("Received CA challenge for node {}", node_id);

        let request = IssueRequest {
            original_node_id: node_id,
            csr: material.csr_b64(&target.common_name)?,
            challenge: &challenge.challenge,
            signature: material.sign_challenge_b64(&challenge.challenge)?,
        };
        let issued: IssueResponse = self.post_json("/ca/issue-certificate", &request).await?;

        let certificate = decode_b64(&issued.certificate, "certificate")?;
        let ca_bundle = decode_b64(&issued.ca_bundle, "ca_bundle")?;
        fs::write(conf_dir.join(target.cert_file), certificate)
            .map_err(|e| AppError::io(format!("写入证书失败: {}", e)))?;
        fs::write(conf_dir.join("ca.crt"), ca_bundle)
            .map_err(|e| AppError::io(format!("写入证书失败: {}", e)))?;

        log::info!("Issued {} into {:?}", target.common_name, conf_dir);
        Ok(())
    }
}

fn decode_b64(value: &str, field: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| AppError::certificate(format!("{} 字段解码失败: {}", field, e)))
}

#[async_trait]
impl CertificateIssuer for HttpCertificateClient {
    async fn issue_node_certificate(&self, output_dir: &Path, node_id: &str) -> Result<String> {
        let conf_dir = output_dir.join("conf");
        self.issue(
            &conf_dir,
            node_id,
            CertTarget {
                common_name: format!("node.{node_id}"),
                key_file: "node.key",
                cert_file: "node.crt",
            },
        )
        .await?;
        Ok(format!(
            "部署成功！证书和私钥已保存到 {}",
            conf_dir.display()
        ))
    }

    async fn issue_console_sdk_certificate(
        &self,
        conf_dir: &Path,
        node_id: &str,
    ) -> Result<String> {
        self.issue(
            conf_dir,
            node_id,
            CertTarget {
                common_name: format!("console.sdk.{node_id}"),
                key_file: "sdk.key",
                cert_file: "sdk.crt",
            },
        )
        .await?;
        Ok(format!(
            "控制台SDK证书签发成功！证书和私钥已保存到 {}",
            conf_dir.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    async fn ca_server(issue: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/ca/request-challenge"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "challenge": "nonce-42" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/ca/issue-certificate"))
            .respond_with(issue)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn material_is_pem_wrapped_and_base64_encoded() {
        let material = CsrMaterial::generate().unwrap();
        assert!(material.private_key_pem().contains("BEGIN PRIVATE KEY"));

        let public = STANDARD.decode(material.public_key_b64()).unwrap();
        assert!(String::from_utf8(public)
            .unwrap()
            .contains("BEGIN PUBLIC KEY"));

        let csr = STANDARD.decode(material.csr_b64("node.abc").unwrap()).unwrap();
        assert!(String::from_utf8(csr)
            .unwrap()
            .contains("BEGIN CERTIFICATE REQUEST"));

        let signature = STANDARD
            .decode(material.sign_challenge_b64("nonce-123").unwrap())
            .unwrap();
        // DER-encoded ECDSA signatures start with a SEQUENCE tag.
        assert_eq!(signature[0], 0x30);
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let client = HttpCertificateClient::new("http://ca.local/v1/");
        assert_eq!(client.base_url, "http://ca.local/v1");
    }

    #[tokio::test]
    async fn unreachable_ca_is_a_network_error_after_key_is_written() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempfile::tempdir().unwrap();
        let client = HttpCertificateClient::new(&format!("http://127.0.0.1:{port}/v1"));

        let err = client
            .issue_node_certificate(dir.path(), "abc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("/ca/request-challenge"));
        assert!(dir.path().join("conf/node.key").exists());
        assert!(!dir.path().join("conf/node.crt").exists());
    }

    #[tokio::test]
    async fn node_certificate_is_issued_through_the_challenge() {
        let server = ca_server(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "certificate": STANDARD.encode("NODE CERT"),
            "ca_bundle": STANDARD.encode("CA BUNDLE"),
        })))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let client = HttpCertificateClient::new(&format!("{}/v1/", server.uri()));

        let message = client.issue_node_certificate(dir.path(), "abc").await.unwrap();
        assert!(message.starts_with("部署成功"));
        let conf = dir.path().join("conf");
        assert_eq!(fs::read_to_string(conf.join("node.crt")).unwrap(), "NODE CERT");
        assert_eq!(fs::read_to_string(conf.join("ca.crt")).unwrap(), "CA BUNDLE");
        assert!(fs::read_to_string(conf.join("node.key"))
            .unwrap()
            .contains("BEGIN PRIVATE KEY"));

        let requests = server.received_requests().await.unwrap();
        let issue = requests
            .iter()
            .find(|r| r.url.path() == "/v1/ca/issue-certificate")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&issue.body).unwrap();
        assert_eq!(body["original_node_id"], "abc");
        assert_eq!(body["challenge"], "nonce-42");
        let csr = STANDARD.decode(body["csr"].as_str().unwrap()).unwrap();
        assert!(String::from_utf8(csr).unwrap().contains("CERTIFICATE REQUEST"));
    }

    #[tokio::test]
    async fn console_sdk_certificate_lands_in_the_given_dir() {
        let server = ca_server(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "certificate": STANDARD.encode("SDK CERT"),
            "ca_bundle": STANDARD.encode("CA BUNDLE"),
        })))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("console/conf");
        let client = HttpCertificateClient::new(&format!("{}/v1", server.uri()));

        client.issue_console_sdk_certificate(&conf, "abc").await.unwrap();
        assert_eq!(fs::read_to_string(conf.join("sdk.crt")).unwrap(), "SDK CERT");
        assert!(conf.join("sdk.key").exists());
        assert!(conf.join("ca.crt").exists());
    }

    #[tokio::test]
    async fn rejected_issuance_carries_status_and_body() {
        let server = ca_server(ResponseTemplate::new(429).set_body_string("quota exceeded")).await;
        let dir = tempfile::tempdir().unwrap();
        let client = HttpCertificateClient::new(&format!("{}/v1", server.uri()));

        let err = client
            .issue_node_certificate(dir.path(), "abc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("quota exceeded"));
        assert!(!dir.path().join("conf/node.crt").exists());
    }

    #[tokio::test]
    async fn undecodable_certificate_is_a_certificate_error() {
        let server = ca_server(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "certificate": "***",
            "ca_bundle": STANDARD.encode("CA"),
        })))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let client = HttpCertificateClient::new(&format!("{}/v1", server.uri()));

        let err = client
            .issue_node_certificate(dir.path(), "abc")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Certificate);
        assert!(err.to_string().starts_with("certificate 字段解码失败"));
    }
}
