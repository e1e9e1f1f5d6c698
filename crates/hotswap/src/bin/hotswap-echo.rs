//! Minimal server used to exercise the supervisor: binds the address given as
//! its first argument, greets every connection with its pid, then echoes.
//!
//! With `HOTSWAP_ECHO_IGNORE_TERM` set it keeps serving through SIGTERM, like
//! a server with a slow graceful shutdown.

use std::process::ExitCode;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let Some(bind) = std::env::args().nth(1) else {
		eprintln!("usage: hotswap-echo <host:port>");
		return ExitCode::from(2);
	};

	let listener = match TcpListener::bind(&bind).await {
		Ok(l) => l,
		Err(e) => {
			eprintln!("failed to bind {}: {}", bind, e);
			return ExitCode::FAILURE;
		}
	};
	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("failed to install SIGTERM handler: {}", e);
			return ExitCode::FAILURE;
		}
	};
	println!("listening on {}", bind);

	let pid = std::process::id();
	let ignore_term = std::env::var_os("HOTSWAP_ECHO_IGNORE_TERM").is_some();
	loop {
		tokio::select! {
			accepted = listener.accept() => match accepted {
				Ok((stream, _)) => {
					tokio::spawn(serve(stream, pid));
				}
				Err(e) => eprintln!("accept failed: {}", e),
			},
			_ = sigterm.recv() => {
				if !ignore_term {
					break;
				}
				println!("SIGTERM ignored, still serving");
			}
			_ = tokio::signal::ctrl_c() => break,
		}
	}

	println!("shutting down");
	ExitCode::SUCCESS
}

async fn serve(mut stream: TcpStream, pid: u32) {
	if stream.write_all(format!("hotswap-echo {}\n", pid).as_bytes()).await.is_err() {
		return;
	}
	let mut buf = [0u8; 4096];
	loop {
		match stream.read(&mut buf).await {
			Ok(0) | Err(_) => return,
			Ok(n) => {
				if stream.write_all(&buf[..n]).await.is_err() {
					return;
				}
			}
		}
	}
}
