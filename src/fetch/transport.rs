//! Transport of the authenticated request to the remote site.

use std::io;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;

/// Status and body of a response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Performs a GET request.
///
/// Network failures are reported as [io::Error], a response with any status is [Ok].
pub trait Transport {
    fn get(&self, url: &str, authorization: &str) -> io::Result<Response>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, authorization: &str) -> io::Result<Response> {
        (**self).get(url, authorization)
    }
}

/// Blocking HTTP(S) [Transport] with an overall request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// A hanging request is aborted after `timeout`, so the next check isn't blocked.
    pub fn new(timeout: Duration) -> io::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(io::Error::other)?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, authorization: &str) -> io::Result<Response> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, authorization)
            .send()
            .map_err(to_io_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().map_err(to_io_error)?.to_vec();
        log::trace!(target: "fetch", "GET {url}: {status} ({} bytes)", body.len());

        Ok(Response { status, body })
    }
}

fn to_io_error(e: reqwest::Error) -> io::Error {
    let kind = if e.is_timeout() {
        io::ErrorKind::TimedOut
    } else if e.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::Other
    };

    io::Error::new(kind, e)
}
