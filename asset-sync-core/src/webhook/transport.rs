use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::contract::{BoxError, WebhookRequest, WebhookResponse, WebhookTransport};

/// Delivers webhook requests as JSON POSTs.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(verify_tls: bool) -> Result<Self, BoxError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn call(&self, url: &str, request: &WebhookRequest) -> Result<WebhookResponse, BoxError> {
        debug!(url = %url, files = request.files.len(), "Calling webhook");
        let resp = self.client.post(url).json(request).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        debug!(url = %url, status, "Webhook responded");
        Ok(WebhookResponse { status, body })
    }
}
