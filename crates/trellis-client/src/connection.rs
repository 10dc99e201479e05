use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use trellis_proto::{
    ConnectOptions, Connector, Endpoint, Request, Response, Transport, TransportError, read_frame,
    write_frame,
};

/// Opens `FramedTransport`s to real servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn transport(&self, endpoint: &Endpoint, options: &ConnectOptions) -> Box<dyn Transport> {
        Box::new(FramedTransport::new(endpoint.clone(), options.clone()))
    }
}

struct Stream {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Length-prefixed MessagePack over a blocking TCP stream. Connects on `open`.
pub struct FramedTransport {
    endpoint: Endpoint,
    options: ConnectOptions,
    stream: Option<Stream>,
}

impl FramedTransport {
    pub fn new(endpoint: Endpoint, options: ConnectOptions) -> Self {
        Self {
            endpoint,
            options,
            stream: None,
        }
    }

    fn connect(&self) -> io::Result<Stream> {
        let mut last_err = None;
        for addr in (self.endpoint.host.as_str(), self.endpoint.port).to_socket_addrs()? {
            let attempt = match self.options.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.options.timeout)?;
                    stream.set_write_timeout(self.options.timeout)?;
                    stream.set_nodelay(true)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    let writer = BufWriter::new(stream);
                    return Ok(Stream { reader, writer });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
        }))
    }
}

impl Transport for FramedTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.close();
        self.stream = Some(self.connect()?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.writer.get_ref().shutdown(Shutdown::Both);
        }
    }

    fn call(&mut self, request: &Request) -> Result<Response, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        write_frame(&mut stream.writer, request)?;
        read_frame(&mut stream.reader)?.ok_or(TransportError::Closed)
    }
}

impl Drop for FramedTransport {
    fn drop(&mut self) {
        self.close();
    }
}
