use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use trellis_proto::{Endpoint, FrameError, Request, read_frame, write_frame};

use crate::session::Session;
use crate::store::MemoryStore;

/// Live client streams by connection id.
type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Serves a `MemoryStore` over the framed TCP protocol until dropped.
pub struct FakeServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    connections: Connections,
    accept: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn spawn(store: Arc<MemoryStore>) -> io::Result<Self> {
        Self::bind(store, "127.0.0.1:0")
    }

    pub fn bind(store: Arc<MemoryStore>, addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        // Non-blocking accept so the loop can observe the shutdown flag.
        listener.set_nonblocking(true)?;
        tracing::info!(%addr, "fake server listening");

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let connections = Connections::default();
        let live = Arc::clone(&connections);
        let accept = thread::spawn(move || serve(listener, store, flag, live));
        Ok(Self {
            addr,
            shutdown,
            connections,
            accept: Some(accept),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Connections accepted and not yet closed.
    pub fn open_connections(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(listener: TcpListener, store: Arc<MemoryStore>, shutdown: Arc<AtomicBool>, connections: Connections) {
    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        handles.retain(|handle| !handle.is_finished());
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = next_id;
                next_id += 1;
                if let Err(e) = track(id, &stream, &connections) {
                    tracing::warn!(%peer, error = %e, "dropping connection");
                    continue;
                }
                let store = Arc::clone(&store);
                let connections = Arc::clone(&connections);
                handles.push(thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, store) {
                        tracing::debug!(%peer, error = %e, "connection ended");
                    }
                    lock(&connections).remove(&id);
                }));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => tracing::error!(error = %e, "accept failed"),
        }
    }

    // Unblocks handlers parked in read_frame.
    for stream in lock(&connections).values() {
        let _ = stream.shutdown(Shutdown::Both);
    }
    for handle in handles {
        let _ = handle.join();
    }
}

fn lock(connections: &Connections) -> MutexGuard<'_, HashMap<u64, TcpStream>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

fn track(id: u64, stream: &TcpStream, connections: &Connections) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let handle = stream.try_clone()?;
    lock(connections).insert(id, handle);
    Ok(())
}

fn handle_connection(stream: TcpStream, store: Arc<MemoryStore>) -> Result<(), FrameError> {
    let mut session = Session::new(store);
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    while let Some(request) = read_frame::<_, Request>(&mut reader)? {
        let response = session.handle(request);
        write_frame(&mut writer, &response)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use trellis_proto::Response;

    use super::*;

    fn version(stream: &TcpStream) -> Response {
        let mut writer = BufWriter::new(stream.try_clone().unwrap());
        write_frame(
            &mut writer,
            &Request::GetStringProperty {
                property: "version".into(),
            },
        )
        .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        read_frame(&mut reader).unwrap().unwrap()
    }

    fn wait_for(server: &FakeServer, open: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if server.open_connections() == open {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn closed_connections_are_forgotten() {
        let server = FakeServer::spawn(Arc::new(MemoryStore::new())).unwrap();
        for _ in 0..3 {
            let stream = TcpStream::connect(server.addr()).unwrap();
            assert!(matches!(version(&stream), Response::String(_)));
            assert_eq!(server.open_connections(), 1);
            drop(stream);
            assert!(wait_for(&server, 0));
        }
    }

    #[test]
    fn shutdown_closes_live_connections() {
        let mut server = FakeServer::spawn(Arc::new(MemoryStore::new())).unwrap();
        let stream = TcpStream::connect(server.addr()).unwrap();
        version(&stream);
        server.shutdown();
        assert_eq!(server.open_connections(), 0);
    }
}
