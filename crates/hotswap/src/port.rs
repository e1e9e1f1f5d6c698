use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Result, SupervisorError};

const FIRST_DELAY: Duration = Duration::from_millis(20);
const MAX_DELAY: Duration = Duration::from_millis(500);

pub fn resolve(bind_address: &str) -> Result<SocketAddr> {
	bind_address
		.to_socket_addrs()
		.ok()
		.and_then(|mut addrs| addrs.next())
		.ok_or_else(|| SupervisorError::InvalidAddress(bind_address.to_string()))
}

/// True if nothing is listening on `addr` right now.
pub fn is_bindable(addr: SocketAddr) -> bool {
	TcpListener::bind(addr).is_ok()
}

/// A free port on the same host as `addr`, for running a candidate next to
/// the live server.
pub fn ephemeral_beside(addr: SocketAddr) -> std::io::Result<SocketAddr> {
	let listener = TcpListener::bind(SocketAddr::new(addr.ip(), 0))?;
	listener.local_addr()
}

/// Where to connect to reach a server bound to `addr`.
fn dial_target(addr: SocketAddr) -> SocketAddr {
	match addr.ip() {
		IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()),
		IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port()),
		_ => addr,
	}
}

pub async fn accepts_connections(addr: SocketAddr) -> bool {
	tokio::net::TcpStream::connect(dial_target(addr)).await.is_ok()
}

struct Backoff {
	delay: Duration,
	deadline: Instant,
}

impl Backoff {
	fn new(timeout: Duration) -> Self {
		Self {
			delay: FIRST_DELAY,
			deadline: Instant::now() + timeout,
		}
	}

	/// Sleeps for the next interval; false once the deadline has passed.
	async fn wait(&mut self) -> bool {
		let now = Instant::now();
		if now >= self.deadline {
			return false;
		}
		let sleep = self.delay.min(self.deadline - now);
		tokio::time::sleep(sleep).await;
		self.delay = (self.delay * 2).min(MAX_DELAY);
		true
	}
}

/// Polls with exponential backoff until `addr` can be bound again.
pub async fn wait_until_released(addr: SocketAddr, timeout: Duration) -> bool {
	let mut backoff = Backoff::new(timeout);
	loop {
		if is_bindable(addr) {
			return true;
		}
		if !backoff.wait().await {
			return is_bindable(addr);
		}
	}
}

/// Polls with exponential backoff until something accepts connections on `addr`.
pub async fn wait_until_listening(addr: SocketAddr, timeout: Duration) -> bool {
	let mut backoff = Backoff::new(timeout);
	loop {
		if accepts_connections(addr).await {
			return true;
		}
		if !backoff.wait().await {
			return false;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolves_host_port() {
		let addr = resolve("127.0.0.1:8080").unwrap();
		assert_eq!(addr.port(), 8080);
		assert!(matches!(resolve("no-port-here"), Err(SupervisorError::InvalidAddress(_))));
	}

	#[test]
	fn bound_port_is_not_bindable() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		assert!(!is_bindable(addr));
		drop(listener);
		assert!(is_bindable(addr));
	}

	#[test]
	fn ephemeral_port_differs() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let side = ephemeral_beside(addr).unwrap();
		assert_eq!(side.ip(), addr.ip());
		assert_ne!(side.port(), addr.port());
	}

	#[tokio::test]
	async fn release_wait_sees_close() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		assert!(!wait_until_released(addr, Duration::from_millis(60)).await);

		let closer = std::thread::spawn(move || {
			std::thread::sleep(Duration::from_millis(50));
			drop(listener);
		});
		assert!(wait_until_released(addr, Duration::from_secs(5)).await);
		closer.join().unwrap();
	}

	#[tokio::test]
	async fn listening_wait() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		assert!(wait_until_listening(addr, Duration::from_secs(1)).await);
		drop(listener);
		assert!(!wait_until_listening(addr, Duration::from_millis(100)).await);
	}
}
