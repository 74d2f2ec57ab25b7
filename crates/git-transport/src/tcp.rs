//! The `git://` daemon protocol.
//!
//! The client opens a TCP connection (port 9418 by default) and sends a
//! single pkt-line naming the service and repository:
//!
//! ```text
//! 0033git-upload-pack /project.git\0host=myserver.com\0
//! ```
//!
//! The daemon answers with the advertisement, or a single `ERR` line if
//! it refuses. Everything after that shares the one connection.

use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use git_protocol::pktline::{PktLine, PktLineReader, PktLineWriter};
use git_protocol::ProtocolError;
use tracing::debug;

use crate::{GitUrl, Service, Transport, TransportError, TransportOptions};

pub const DEFAULT_PORT: u16 = 9418;

pub struct TcpTransport {
    stream: BufReader<TcpStream>,
    url: String,
}

impl TcpTransport {
    pub fn connect(url: &GitUrl, service: Service, options: &TransportOptions) -> Result<Self, TransportError> {
        let host = url
            .host
            .as_deref()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{url} has no host")))?;
        let port = url.port.unwrap_or(DEFAULT_PORT);
        let shown = url.to_string();
        let connect_err = |source| TransportError::Connect {
            url: shown.clone(),
            source,
        };

        let addrs = (host, port).to_socket_addrs().map_err(connect_err)?;
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            let attempt = match options.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => {
                    debug!(%addr, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(err)) => return Err(connect_err(err)),
            (None, None) => {
                return Err(connect_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                )))
            }
        };
        stream.set_read_timeout(options.io_timeout)?;
        stream.set_write_timeout(options.io_timeout)?;
        stream.set_nodelay(true)?;

        let mut writer = PktLineWriter::new(&stream);
        let request = format!("{} {}\0host={}\0", service.as_str(), url.path, url.host_with_port());
        writer.write_line(request.as_bytes())?;
        writer.flush()?;
        debug!(url = %shown, service = service.as_str(), "git daemon connection opened");

        Ok(Self {
            stream: BufReader::new(stream),
            url: shown,
        })
    }
}

impl Transport for TcpTransport {
    fn advertise(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut reader = PktLineReader::new(&mut self.stream);
        let mut out = PktLineWriter::new(Vec::new());
        loop {
            match reader.read_pkt() {
                Ok(PktLine::Data(data)) => out.write_line(&data)?,
                Ok(PktLine::Flush) => {
                    out.write_flush()?;
                    break;
                }
                Ok(other) => {
                    return Err(ProtocolError::Protocol(format!("unexpected {other:?} in advertisement")).into())
                }
                // A refusing daemon sends its ERR line and hangs up; let the
                // parser report whatever arrived.
                Err(ProtocolError::UnexpectedEof(_)) => break,
                Err(err) => return Err(err.into()),
            }
        }
        let bytes = out.into_inner();
        debug!(url = %self.url, bytes = bytes.len(), "read advertisement");
        Ok(bytes)
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Box<dyn Read + '_>, TransportError> {
        let stream = self.stream.get_mut();
        stream.write_all(request)?;
        stream.flush()?;
        Ok(Box::new(&mut self.stream))
    }
}
