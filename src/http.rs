// Transport capability. The agent never talks to the network directly; it
// drives whatever implements `HttpClient`, so the platform stack stays out of
// the orchestration logic and tests can substitute canned responses.

use std::io::Read;

use crate::error::UpdateError;

/// Redirect handling for a single GET. The release-API strategy follows
/// redirects; the redirect strategy must see the raw 302 itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPolicy {
    Follow,
    Stop,
}

/// One in-flight GET response. The body borrows the client connection, so a
/// response must be consumed before the next request is issued; the agent is
/// single-threaded and sequential, matching that constraint.
pub struct HttpResponse<'a> {
    pub status: u16,
    pub location: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + 'a>,
}

impl HttpResponse<'_> {
    pub fn read_body(mut self) -> Result<Vec<u8>, UpdateError> {
        let mut buf = Vec::new();
        self.body
            .read_to_end(&mut buf)
            .map_err(|err| UpdateError::Connect(err.to_string()))?;
        Ok(buf)
    }
}

pub trait HttpClient {
    fn get<'a>(
        &'a mut self,
        url: &str,
        redirects: RedirectPolicy,
    ) -> Result<HttpResponse<'a>, UpdateError>;
}
