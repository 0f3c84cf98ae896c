use std::io;
use std::pin::Pin;
use std::time::Duration;

use futures_util::TryStreamExt;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use trustee_core::{Fault, ParseFaultKind};
use url::{form_urlencoded, Url};

/// A buffered byte stream handed out by the network client.
pub type ByteStream = Pin<Box<dyn AsyncBufRead + Send>>;

#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub connect_timeout: Duration,
    /// Maximum time between two reads on an open connection.
    pub read_timeout: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("malformed total {0:?}")]
    MalformedTotal(String),
    #[error("network error: {0}")]
    Transport(String),
}

impl From<NetError> for Fault {
    fn from(err: NetError) -> Self {
        match err {
            NetError::InvalidUrl { url, message } => Fault::InvalidUrl(format!("{url}: {message}")),
            NetError::Timeout(message) => Fault::SocketTimeout(message),
            NetError::MalformedTotal(body) => Fault::parse(ParseFaultKind::MalformedTotal, body),
            other => Fault::Io(other.to_string()),
        }
    }
}

/// The three ABB endpoints a verification talks to.
#[async_trait::async_trait]
pub trait NetworkClient: Send + Sync {
    /// GET a decimal ballot count.
    async fn get_total(&self, url: &Url) -> Result<u64, NetError>;
    /// GET a streamed body.
    async fn stream_get(&self, url: &Url) -> Result<ByteStream, NetError>;
    /// POST `body` as a single write.
    async fn post(&self, url: &Url, body: &str) -> Result<(), NetError>;
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn parse_url(raw: String) -> Result<Url, NetError> {
    Url::parse(&raw).map_err(|err| NetError::InvalidUrl {
        url: raw.clone(),
        message: err.to_string(),
    })
}

/// `<base>gettotal/?<id>`
pub fn total_url(base: &str, election_id: &str) -> Result<Url, NetError> {
    parse_url(format!("{base}gettotal/?{}", encode(election_id)))
}

/// `<base>?id=<id>&start=<start>&stop=<stop>`
pub fn ballots_url(base: &str, election_id: &str, start: u64, stop: u64) -> Result<Url, NetError> {
    parse_url(format!(
        "{base}?id={}&start={}&stop={}",
        encode(election_id),
        encode(&start.to_string()),
        encode(&stop.to_string())
    ))
}

/// `<base>post/?<id>`
pub fn post_url(base: &str, election_id: &str) -> Result<Url, NetError> {
    parse_url(format!("{base}post/?{}", encode(election_id)))
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(settings: NetworkSettings) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build()
            .map_err(|err| NetError::Transport(err.to_string()))?;
        Ok(Self { client })
    }

    async fn checked(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, NetError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl NetworkClient for ReqwestClient {
    async fn get_total(&self, url: &Url) -> Result<u64, NetError> {
        let response = self.checked(self.client.get(url.clone())).await?;
        let body = response.text().await.map_err(map_reqwest_error)?;
        let trimmed = body.trim();
        trimmed
            .parse::<u64>()
            .map_err(|_| NetError::MalformedTotal(trimmed.to_owned()))
    }

    async fn stream_get(&self, url: &Url) -> Result<ByteStream, NetError> {
        let response = self.checked(self.client.get(url.clone())).await?;
        let stream = response.bytes_stream().map_err(|err| {
            let kind = if err.is_timeout() {
                io::ErrorKind::TimedOut
            } else {
                io::ErrorKind::Other
            };
            io::Error::new(kind, err)
        });
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn post(&self, url: &Url, body: &str) -> Result<(), NetError> {
        self.checked(self.client.post(url.clone()).body(body.to_owned()))
            .await?;
        Ok(())
    }
}

fn map_reqwest_error(err: reqwest::Error) -> NetError {
    if err.is_timeout() {
        return NetError::Timeout(err.to_string());
    }
    if err.is_builder() {
        let url = err.url().map(Url::to_string).unwrap_or_default();
        return NetError::InvalidUrl {
            url,
            message: err.to_string(),
        };
    }
    NetError::Transport(err.to_string())
}
