// HTTPS transport over esp-idf-svc's HTTP client. One connection is created
// per request because the redirect policy is part of the connection
// configuration; the agent issues requests strictly sequentially.

use std::io;
use std::sync::Once;
use std::time::Duration;

use embedded_svc::http::client::Client;
use embedded_svc::http::{Headers, Method, Status};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection, FollowRedirectsPolicy};

use crate::error::UpdateError;
use crate::http::{HttpClient, HttpResponse, RedirectPolicy};

/// DigiCert Global Root CA: the trust anchor for github.com release hosts.
/// Pinned at build time, not rotated at runtime. NUL-terminated as esp-tls
/// expects for PEM input.
pub const GITHUB_ROOT_CA: &[u8] = concat!(
    include_str!("github_root_ca.pem"),
    "\0"
)
.as_bytes();

static ROOT_CA_INSTALL: Once = Once::new();

fn install_root_ca() -> Result<(), UpdateError> {
    let mut result = Ok(());
    ROOT_CA_INSTALL.call_once(|| {
        let err = unsafe {
            esp_idf_sys::esp_tls_init_global_ca_store();
            esp_idf_sys::esp_tls_set_global_ca_store(
                GITHUB_ROOT_CA.as_ptr(),
                GITHUB_ROOT_CA.len() as u32,
            )
        };
        if err != esp_idf_sys::ESP_OK {
            result = Err(UpdateError::Connect(format!(
                "installing root CA store failed: {err}"
            )));
        }
    });
    result
}

pub struct EspTransport {
    client: Option<Client<EspHttpConnection>>,
}

impl EspTransport {
    pub fn new() -> Result<Self, UpdateError> {
        install_root_ca()?;
        Ok(Self { client: None })
    }
}

impl HttpClient for EspTransport {
    fn get<'a>(
        &'a mut self,
        url: &str,
        redirects: RedirectPolicy,
    ) -> Result<HttpResponse<'a>, UpdateError> {
        let configuration = Configuration {
            buffer_size: Some(4096),
            timeout: Some(Duration::from_secs(30)),
            follow_redirects_policy: match redirects {
                RedirectPolicy::Follow => FollowRedirectsPolicy::FollowAll,
                RedirectPolicy::Stop => FollowRedirectsPolicy::FollowNone,
            },
            use_global_ca_store: true,
            ..Default::default()
        };

        let connection = EspHttpConnection::new(&configuration)
            .map_err(|err| UpdateError::Connect(err.to_string()))?;
        let client = self.client.insert(Client::wrap(connection));

        let request = client
            .request(Method::Get, url, &[])
            .map_err(|err| UpdateError::Connect(err.to_string()))?;
        let response = request
            .submit()
            .map_err(|err| UpdateError::Connect(err.to_string()))?;

        let status = response.status();
        let location = response.header("Location").map(str::to_string);
        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.parse().ok());

        Ok(HttpResponse {
            status,
            location,
            content_length,
            body: Box::new(BodyReader(response)),
        })
    }
}

struct BodyReader<C: embedded_svc::io::Read>(C);

impl<C: embedded_svc::io::Read> io::Read for BodyReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        embedded_svc::io::Read::read(&mut self.0, buf)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, format!("{err:?}")))
    }
}
