//! Instrumented HTTP GET.
//!
//! Each phase (resolve, connect, TLS, request) is driven by hand so that its
//! start and end can be timestamped. Redirects are never followed.

use super::{PhaseTimes, ProbeError};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{HOST, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::{Host, Url};

const USER_AGENT_VALUE: &str = concat!("uptrail/", env!("CARGO_PKG_VERSION"));

/// Perform one GET against `address`, recording phase timestamps into `times`.
///
/// Returns the response status once the body has been fully read.
/// `request_start` and `request_done` are left to the caller.
pub async fn http_get(address: &str, times: &mut PhaseTimes) -> Result<u16, ProbeError> {
    let url = Url::parse(address).map_err(|e| ProbeError::InvalidAddress(e.to_string()))?;

    let tls = match url.scheme() {
        "http" => false,
        "https" => true,
        other => {
            return Err(ProbeError::InvalidAddress(format!(
                "unsupported scheme {}",
                other
            )))
        }
    };

    let host = url
        .host()
        .ok_or_else(|| ProbeError::InvalidAddress("missing host".to_string()))?;
    let port = url
        .port_or_known_default()
        .unwrap_or(if tls { 443 } else { 80 });

    let addrs = resolve(&host, port, times).await?;

    times.connect_start = Some(Instant::now());
    let stream = connect(&addrs).await;
    times.connect_done = Some(Instant::now());
    let stream = stream?;

    if tls {
        let server_name = server_name(&host)?;
        let connector = TlsConnector::from(tls_config()?);

        times.tls_start = Some(Instant::now());
        let stream = connector.connect(server_name, stream).await;
        times.tls_done = Some(Instant::now());
        let stream = stream.map_err(|e| ProbeError::Tls(e.to_string()))?;

        times.got_conn = Some(Instant::now());
        exchange(stream, &url, times).await
    } else {
        times.got_conn = Some(Instant::now());
        exchange(stream, &url, times).await
    }
}

async fn resolve(
    host: &Host<&str>,
    port: u16,
    times: &mut PhaseTimes,
) -> Result<Vec<SocketAddr>, ProbeError> {
    match host {
        Host::Domain(domain) => {
            times.dns_start = Some(Instant::now());
            let resolved = tokio::net::lookup_host((*domain, port)).await;
            times.dns_done = Some(Instant::now());

            let addrs: Vec<SocketAddr> = resolved
                .map_err(|e| ProbeError::Dns(format!("{}: {}", domain, e)))?
                .collect();
            if addrs.is_empty() {
                return Err(ProbeError::Dns(format!("{}: no addresses", domain)));
            }
            Ok(addrs)
        }
        Host::Ipv4(ip) => Ok(vec![SocketAddr::new(IpAddr::V4(*ip), port)]),
        Host::Ipv6(ip) => Ok(vec![SocketAddr::new(IpAddr::V6(*ip), port)]),
    }
}

async fn connect(addrs: &[SocketAddr]) -> Result<TcpStream, ProbeError> {
    let mut last_err = None;

    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_err = Some(format!("{}: {}", addr, e)),
        }
    }

    Err(ProbeError::Connect(
        last_err.unwrap_or_else(|| "no addresses to connect to".to_string()),
    ))
}

fn server_name(host: &Host<&str>) -> Result<ServerName<'static>, ProbeError> {
    match host {
        Host::Domain(domain) => ServerName::try_from(domain.to_string())
            .map_err(|e| ProbeError::InvalidAddress(e.to_string())),
        Host::Ipv4(ip) => Ok(ServerName::from(IpAddr::V4(*ip))),
        Host::Ipv6(ip) => Ok(ServerName::from(IpAddr::V6(*ip))),
    }
}

fn tls_config() -> Result<Arc<ClientConfig>, ProbeError> {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

    if let Some(config) = CONFIG.get() {
        return Ok(config.clone());
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ProbeError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(CONFIG.get_or_init(|| Arc::new(config)).clone())
}

/// Send the request over an established connection and drain the response.
async fn exchange<S>(stream: S, url: &Url, times: &mut PhaseTimes) -> Result<u16, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let authority = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(ProbeError::InvalidAddress("missing host".to_string())),
    };

    let request = Request::builder()
        .method(Method::GET)
        .uri(&url[url::Position::BeforePath..url::Position::AfterQuery])
        .header(HOST, authority)
        .header(USER_AGENT, USER_AGENT_VALUE)
        .body(Empty::<Bytes>::new())
        .map_err(|e| ProbeError::InvalidAddress(e.to_string()))?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| ProbeError::Http(e.to_string()))?;

    // The connection resolves once the sender is dropped at the end of the exchange.
    let exchange = async move {
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;
        times.first_byte = Some(Instant::now());

        let status = response.status().as_u16();
        response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        Ok(status)
    };

    let (result, conn_result) = tokio::join!(exchange, conn);
    if let Err(e) = conn_result {
        tracing::debug!("Connection to {} closed with error: {}", url, e);
    }

    result
}
