//! Smart HTTP.
//!
//! Discovery is `GET $URL/info/refs?service=<service>`; every later
//! exchange is a `POST $URL/<service>` whose body is the whole request.
//! The server keeps no state between POSTs, so negotiation resends what it
//! needs each round.
//!
//! A 401 makes the transport ask its credential provider once; the answer
//! is reused for every later request on this connection.

use std::io::Read;
use std::sync::Arc;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use crate::credential::{Credential, CredentialProvider, CredentialRequest};
use crate::{GitUrl, Service, Transport, TransportError, TransportOptions};

pub struct HttpTransport {
    client: Client,
    base: String,
    service: Service,
    provider: Option<Arc<dyn CredentialProvider>>,
    credential_request: CredentialRequest,
    credential: Option<Credential>,
    auth_retried: bool,
    approved: bool,
}

impl HttpTransport {
    pub fn new(url: &GitUrl, service: Service, options: &TransportOptions) -> Result<Self, TransportError> {
        let base = url.http_base();
        let mut builder = Client::builder()
            .user_agent(options.user_agent.as_str())
            .timeout(options.io_timeout);
        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if !options.use_env_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(|source| TransportError::Request {
            url: base.clone(),
            source,
        })?;

        let credential = match (&url.user, &url.password) {
            (Some(user), Some(password)) => Some(Credential::new(user.clone(), password.clone())),
            _ => None,
        };
        let credential_request = CredentialRequest {
            protocol: url.scheme.to_string(),
            host: url.host_with_port(),
            path: Some(url.path.trim_start_matches('/').to_string()).filter(|p| !p.is_empty()),
            username: url.user.clone(),
        };

        Ok(Self {
            client,
            base,
            service,
            provider: options.credentials.clone(),
            credential_request,
            credential,
            auth_retried: false,
            approved: false,
        })
    }

    /// Send the request `build` produces, retrying once with fresh
    /// credentials on a 401.
    fn send(&mut self, url: &str, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response, TransportError> {
        loop {
            let mut request = build(&self.client);
            if let Some(credential) = &self.credential {
                request = request.basic_auth(&credential.username, Some(&credential.password));
            }
            let response = request.send().map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
            let status = response.status();
            debug!(url, status = status.as_u16(), "http response");

            if status == StatusCode::UNAUTHORIZED {
                if !self.auth_retried {
                    self.auth_retried = true;
                    if let Some(provider) = &self.provider {
                        if let Some(credential) = provider.fill(&self.credential_request)? {
                            debug!(url, username = %credential.username, "retrying with credentials");
                            self.credential = Some(credential);
                            continue;
                        }
                    }
                }
                if let (Some(provider), Some(credential)) = (&self.provider, &self.credential) {
                    provider.reject(&self.credential_request, credential);
                }
                return Err(TransportError::AuthenticationFailed(url.to_string()));
            }
            if !status.is_success() {
                return Err(TransportError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            if !self.approved {
                self.approved = true;
                if let (Some(provider), Some(credential)) = (&self.provider, &self.credential) {
                    provider.approve(&self.credential_request, credential);
                }
            }
            return Ok(response);
        }
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

impl Transport for HttpTransport {
    fn advertise(&mut self) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}/info/refs?service={}", self.base, self.service.as_str());
        let response = self.send(&url, |client| client.get(&url))?;
        let expected = format!("application/x-{}-advertisement", self.service.as_str());
        if content_type(&response) != expected {
            return Err(TransportError::DumbServer(self.base.clone()));
        }
        let body = response.bytes().map_err(|source| TransportError::Request {
            url: url.clone(),
            source,
        })?;
        debug!(url = %self.base, bytes = body.len(), "read advertisement");
        Ok(body.to_vec())
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Box<dyn Read + '_>, TransportError> {
        let service = self.service.as_str();
        let url = format!("{}/{}", self.base, service);
        let request_type = format!("application/x-{service}-request");
        let result_type = format!("application/x-{service}-result");
        let response = self.send(&url, |client| {
            client
                .post(&url)
                .header(CONTENT_TYPE, &request_type)
                .header(ACCEPT, &result_type)
                .body(request.to_vec())
        })?;
        let got = content_type(&response);
        if got != result_type {
            return Err(TransportError::UnexpectedContentType { url, content_type: got });
        }
        Ok(Box::new(response))
    }

    fn is_stateless(&self) -> bool {
        true
    }
}
