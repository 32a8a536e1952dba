use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

#[async_trait]
pub trait HttpGet: Send + Sync {
    /// GET `url` and return the raw body. Non-2xx statuses are not an error
    /// here, apis like tumblr report them inside the json body.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tumbfoxbot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpGet for ReqwestHttp {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let res = self.client.get(url).send().await?;
        debug!(status = %res.status(), "GET finished");

        Ok(res.bytes().await?.to_vec())
    }
}
