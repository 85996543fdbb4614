use async_trait::async_trait;
use statebind_util::{HttpTransport, RestRequest, RestResponse};

/// Transport for tests that must never reach the network.
pub(crate) struct OfflineTransport;

#[async_trait]
impl HttpTransport for OfflineTransport {
    async fn execute(&self, request: RestRequest) -> anyhow::Result<RestResponse> {
        anyhow::bail!("offline transport cannot send {} {}", request.method, request.full_url())
    }
}
