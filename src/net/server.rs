//! TCP remote rendering server: each connection owns an independent
//! [`DeJongMap`], so closing the connection stops and releases that
//! calculation's state.
//!
//! The accept loop spawns one task per connection, each driving a
//! `Framed` codec over the line-oriented protocol in
//! [`crate::net::protocol`].

use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::warn;

use crate::map::DeJongMap;
use crate::net::privilege::drop_privileges;
use crate::net::protocol::{Response, ResponseCode, ServerProtocol};

pub struct RemoteServer {
    listener: TcpListener,
}

impl RemoteServer {
    pub async fn bind(port: u16) -> Result<RemoteServer> {
        let listener =
            TcpListener::bind(("0.0.0.0", port)).await.context("failed to bind the remote server")?;
        Ok(RemoteServer { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Drops root privileges to `drop_to_user` (if given and if
    /// running as root), then serves connections until accept fails.
    pub async fn serve(self, drop_to_user: Option<&str>) -> Result<()> {
        if let Some(username) = drop_to_user {
            drop_privileges(username)?;
        }

        loop {
            let (socket, addr) = self.listener.accept().await.context("accept failed")?;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket).await {
                    warn!(%addr, error = %e, "remote connection ended with an error");
                }
            });
        }
    }
}

async fn handle_connection(socket: TcpStream) -> Result<()> {
    let mut framed = Framed::new(socket, ServerProtocol);
    framed.send(Response::ready("Fyre rendering server ready")).await?;

    let mut map = DeJongMap::new();

    while let Some(line) = framed.next().await {
        let line = line.context("failed to read a command line")?;
        let response = dispatch(&mut map, &line);
        framed.send(response).await?;
    }
    Ok(())
}

/// Dispatches one command line against a connection's private
/// calculation state.
fn dispatch(map: &mut DeJongMap, line: &str) -> Response {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

    match verb {
        "set_param" => match rest.split_once('=') {
            Some((name, value)) => match map.set_param(name.trim(), value.trim()) {
                Ok(()) => Response::ok("ok"),
                Err(e) => Response::bad_value(e.to_string()),
            },
            None => Response::bad_value("expected 'set_param name = value'"),
        },
        "set_render_time" => match rest.trim().parse::<f64>() {
            Ok(seconds) => {
                map.set_render_time(seconds);
                Response::ok("ok")
            }
            Err(_) => Response::bad_value("expected a number of seconds"),
        },
        "calc_start" => {
            map.start_calculation();
            Response::ok("ok")
        }
        "calc_stop" => {
            map.stop_calculation();
            Response::ok("ok")
        }
        "calc_step" => {
            let seconds = map.render_time();
            map.calculate_timed(seconds);
            Response::ok("ok")
        }
        "calc_status" => {
            Response::progress(map.iterations() as f64, map.imager().peak_density())
        }
        "get_histogram_stream" => {
            let stream = map.imager_mut().export_stream(64 * 1024);
            Response::binary(stream)
        }
        "is_gui_available" => Response::new(ResponseCode::False, "false"),
        "set_gui_style" => Response::unsupported("no GUI to style"),
        "" => Response::unrecognized("empty command"),
        _ => Response::unrecognized(format!("unrecognized command '{verb}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_param_then_status_reports_progress() {
        let mut map = DeJongMap::new();
        assert_eq!(dispatch(&mut map, "set_param zoom = 2.0").code, ResponseCode::Ok);
        map.calculate_timed(0.01);
        assert_eq!(dispatch(&mut map, "calc_status").code, ResponseCode::Progress);
    }

    #[test]
    fn malformed_set_param_is_a_bad_value() {
        let mut map = DeJongMap::new();
        assert_eq!(dispatch(&mut map, "set_param zoom").code, ResponseCode::BadValue);
    }

    #[test]
    fn unrecognized_verb_is_reported() {
        let mut map = DeJongMap::new();
        assert_eq!(dispatch(&mut map, "do_a_barrel_roll").code, ResponseCode::Unrecognized);
    }

    #[test]
    fn get_histogram_stream_returns_binary() {
        let mut map = DeJongMap::new();
        map.calculate_timed(0.01);
        let response = dispatch(&mut map, "get_histogram_stream");
        assert_eq!(response.code, ResponseCode::Binary);
        assert!(response.binary.is_some());
    }

    #[tokio::test]
    async fn accepted_connection_greets_with_220() {
        let server = RemoteServer::bind(0).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.serve(None));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, crate::net::protocol::ClientProtocol::default());
        let greeting = framed.next().await.unwrap().unwrap();
        assert_eq!(greeting.code, ResponseCode::Ready);
    }
}
