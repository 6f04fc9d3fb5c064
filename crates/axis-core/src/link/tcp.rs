//! Line-oriented controller codec over per-call TCP connections.
//!
//! Requests are `verb/{bl}_{axis}/arg\n`; replies echo the request path and
//! carry the payload in the fourth `/`-separated field, e.g.
//! `get/bl_41in_st2_slit1/ok/inactive_7.150mm` or `put/.../0`.

use super::{ControllerLink, ControllerState, Reading};
use crate::error::{AxisError, Result};
use crate::settings::Endpoint;
use crate::types::{Axis, LimitFlags, Unit};
use crate::units;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const REPLY_BUF: usize = 1024;

pub struct TcpLink {
    endpoint: Endpoint,
    timeout: Duration,
}

impl TcpLink {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn object(&self, axis: &Axis) -> String {
        format!("{}_{}", self.endpoint.bl_object, axis.name)
    }

    async fn connect(&self, axis: &Axis, operation: &str) -> Result<TcpStream> {
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Err(_) => Err(timed_out(axis, operation)),
            Ok(Err(e)) => Err(AxisError::LinkRefused {
                endpoint: self.endpoint.to_string(),
                reason: e.to_string(),
            }),
            Ok(Ok(stream)) => {
                // Requests are tiny and latency-bound.
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
        }
    }

    /// Send one request and read one reply, both under the link timeout.
    async fn exchange(
        &self,
        stream: &mut TcpStream,
        axis: &Axis,
        operation: &str,
        request: String,
    ) -> Result<String> {
        tracing::debug!(axis = %axis.name, "send {}", request.trim_end());
        let io = async {
            stream.write_all(request.as_bytes()).await?;
            stream.flush().await?;
            let mut buf = vec![0u8; REPLY_BUF];
            let n = stream.read(&mut buf).await?;
            Ok::<_, std::io::Error>(String::from_utf8_lossy(&buf[..n]).trim().to_string())
        };
        let reply = timeout(self.timeout, io)
            .await
            .map_err(|_| timed_out(axis, operation))?
            .map_err(|e| protocol(axis, format!("{operation}: {e}")))?;
        tracing::debug!(axis = %axis.name, "recv {reply}");
        if reply.is_empty() {
            return Err(protocol(axis, format!("empty reply to {operation}")));
        }
        Ok(reply)
    }

    async fn put(&self, axis: &Axis, operation: &str, arg: String) -> Result<()> {
        let mut stream = self.connect(axis, operation).await?;
        let request = format!("put/{}/{arg}\n", self.object(axis));
        let reply = self.exchange(&mut stream, axis, operation, request).await?;
        if is_ack(&reply) {
            Ok(())
        } else {
            Err(AxisError::Rejected {
                axis: axis.name.clone(),
                operation: operation.to_string(),
                reply,
            })
        }
    }
}

#[async_trait]
impl ControllerLink for TcpLink {
    async fn fetch_state_and_position(&self, axis: &Axis) -> Result<Reading> {
        let mut stream = self.connect(axis, "query").await?;
        let request = format!("get/{}/query\n", self.object(axis));
        let reply = self.exchange(&mut stream, axis, "query", request).await?;
        let state = match parse_query(&reply, axis)? {
            QueryReply::Full(reading) => return Ok(reading),
            QueryReply::StateOnly(state) => state,
        };

        // Query carried no position; ask for it on the same connection.
        let verb = position_verb(axis);
        let request = format!("get/{}/{verb}\n", self.object(axis));
        let reply = self.exchange(&mut stream, axis, verb, request).await?;
        let position_pulse = parse_position(&reply, axis)?;
        Ok(Reading {
            state,
            position_pulse,
        })
    }

    async fn put_position(&self, axis: &Axis, pulse: i64) -> Result<()> {
        tracing::info!(axis = %axis.name, pulse, "move");
        self.put(axis, "move", format!("{pulse}pulse")).await
    }

    async fn put_stop(&self, axis: &Axis) -> Result<()> {
        tracing::info!(axis = %axis.name, "stop");
        self.put(axis, "stop", "stop".to_string()).await
    }

    async fn fetch_status(&self, axis: &Axis) -> Result<LimitFlags> {
        let mut stream = self.connect(axis, "status").await?;
        let request = format!("get/{}/status\n", self.object(axis));
        let reply = self.exchange(&mut stream, axis, "status", request).await?;
        parse_status(&reply, axis)
    }
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub(crate) enum QueryReply {
    Full(Reading),
    StateOnly(ControllerState),
}

fn timed_out(axis: &Axis, operation: &str) -> AxisError {
    AxisError::LinkTimeout {
        axis: axis.name.clone(),
        operation: operation.to_string(),
    }
}

fn protocol(axis: &Axis, reason: impl Into<String>) -> AxisError {
    AxisError::ProtocolError {
        axis: axis.name.clone(),
        reason: reason.into(),
    }
}

fn payload<'a>(reply: &'a str, axis: &Axis) -> Result<(Vec<&'a str>, &'a str)> {
    if reply.to_ascii_lowercase().contains("error") {
        return Err(protocol(axis, format!("controller reported error: {reply}")));
    }
    let fields: Vec<&str> = reply.split('/').collect();
    let Some(part) = fields.get(3).copied().map(str::trim) else {
        return Err(protocol(axis, format!("reply has no payload field: {reply}")));
    };
    Ok((fields, part))
}

/// `ok`/`inactive` is idle, `fault` is a fault, any other word means the
/// axis is busy.
fn parse_state(word: &str) -> Option<ControllerState> {
    let word = word.trim().to_ascii_lowercase();
    if word.is_empty() || !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(match word.as_str() {
        "ok" | "inactive" | "idle" => ControllerState::Idle,
        "fault" | "alarm" => ControllerState::Fault,
        _ => ControllerState::Moving,
    })
}

/// Parse `12345pulse`, `7.150mm` or a bare number into controller pulses.
/// A bare number is read in the axis's own unit.
fn parse_value(raw: &str, axis: &Axis) -> Option<i64> {
    let raw = raw.trim();
    let (number, unit) = Unit::all()
        .iter()
        .find_map(|u| raw.strip_suffix(u.as_str()).map(|n| (n.trim(), *u)))
        .unwrap_or((raw, axis.unit));
    let value: f64 = number.parse().ok()?;
    if unit.is_physical() {
        units::physical_to_controller_pulse(value, axis)
    } else {
        let rounded = value.round();
        rounded.is_finite().then_some(rounded as i64)
    }
}

pub(crate) fn parse_query(reply: &str, axis: &Axis) -> Result<QueryReply> {
    let (fields, part) = payload(reply, axis)?;

    if let Some((state, value)) = part.split_once('_') {
        let state = parse_state(state)
            .ok_or_else(|| protocol(axis, format!("unrecognized state in '{part}'")))?;
        return Ok(match parse_value(value, axis) {
            Some(position_pulse) => QueryReply::Full(Reading {
                state,
                position_pulse,
            }),
            None => QueryReply::StateOnly(state),
        });
    }

    // `/ok/0` and `/active/0`: the status word sits one field earlier.
    if part == "0" {
        if let Some(state) = fields.get(2).and_then(|w| parse_state(w)) {
            return Ok(QueryReply::StateOnly(state));
        }
    }

    parse_state(part)
        .map(QueryReply::StateOnly)
        .ok_or_else(|| protocol(axis, format!("unrecognized query payload '{part}'")))
}

pub(crate) fn parse_position(reply: &str, axis: &Axis) -> Result<i64> {
    let (_, part) = payload(reply, axis)?;
    parse_value(part, axis).ok_or_else(|| protocol(axis, format!("unparseable position '{part}'")))
}

pub(crate) fn parse_status(reply: &str, axis: &Axis) -> Result<LimitFlags> {
    let (_, part) = payload(reply, axis)?;
    let bits: u32 = part
        .parse()
        .map_err(|_| protocol(axis, format!("unparseable status word '{part}'")))?;
    if bits > 0b11111 {
        return Err(protocol(axis, format!("status word {bits} out of range")));
    }
    Ok(LimitFlags::from_bits(bits as u8))
}

pub(crate) fn is_ack(reply: &str) -> bool {
    reply.trim_end().ends_with("/0")
}

/// Angular axes answer `angle`, slit apertures answer `aperture`.
fn position_verb(axis: &Axis) -> &'static str {
    if matches!(axis.unit, Unit::Deg | Unit::Mrad) || axis.name.ends_with("angle") {
        "angle"
    } else if axis.name.ends_with("width") || axis.name.ends_with("height") {
        "aperture"
    } else {
        "position"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::net::TcpListener;

    fn pulse_axis() -> Axis {
        Axis::new("st2_slit1_upper")
    }

    fn mm_axis() -> Axis {
        Axis::new("st2_slit1_upper")
            .with_unit(Unit::Mm)
            .with_val2pulse(1000.0)
    }

    #[test]
    fn query_with_pulse_position() {
        let r = parse_query("get/bl_41in_x/ok/moving_12345pulse", &pulse_axis()).unwrap();
        assert_eq!(
            r,
            QueryReply::Full(Reading {
                state: ControllerState::Moving,
                position_pulse: 12345
            })
        );
    }

    #[test]
    fn query_with_physical_position() {
        let r = parse_query("get/bl_41in_x/ok/inactive_7.150mm", &mm_axis()).unwrap();
        assert_eq!(
            r,
            QueryReply::Full(Reading {
                state: ControllerState::Idle,
                position_pulse: 7150
            })
        );
        let r = parse_query("get/bl_41in_x/ok/ok_1.5mm", &mm_axis()).unwrap();
        assert!(matches!(r, QueryReply::Full(Reading { state: ControllerState::Idle, .. })));
    }

    #[test]
    fn query_state_only_forms() {
        let a = pulse_axis();
        assert_eq!(
            parse_query("get/bl_41in_x/ok/ok", &a).unwrap(),
            QueryReply::StateOnly(ControllerState::Idle)
        );
        assert_eq!(
            parse_query("get/bl_41in_x/active/0", &a).unwrap(),
            QueryReply::StateOnly(ControllerState::Moving)
        );
        assert_eq!(
            parse_query("get/bl_41in_x/ok/fault", &a).unwrap(),
            QueryReply::StateOnly(ControllerState::Fault)
        );
    }

    #[test]
    fn malformed_replies_are_protocol_errors() {
        let a = pulse_axis();
        for reply in ["get/bl_41in_x", "get/bl_41in_x/ng/Error: no such axis", "get/x/ok/12ab"] {
            let err = parse_query(reply, &a).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError, "reply {reply}");
        }
        assert!(parse_position("get/x/ok/abc", &a).is_err());
    }

    #[test]
    fn error_reply_is_not_a_fault_state() {
        let a = pulse_axis();
        assert_eq!(
            parse_query("get/bl_41in_x/ok/alarm", &a).unwrap(),
            QueryReply::StateOnly(ControllerState::Fault)
        );
        for reply in ["get/bl_41in_x/ok/error", "get/bl_41in_x/ok/ERROR_120pulse"] {
            let err = parse_query(reply, &a).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError, "reply {reply}");
        }
    }

    #[test]
    fn bare_position_uses_axis_unit() {
        assert_eq!(parse_position("get/x/ok/-250", &pulse_axis()).unwrap(), -250);
        assert_eq!(parse_position("get/x/ok/0.25", &mm_axis()).unwrap(), 250);
    }

    #[test]
    fn status_word_decodes() {
        let flags = parse_status("get/x/ok/17", &pulse_axis()).unwrap();
        assert!(flags.cw_hard);
        assert!(flags.home);
        assert!(parse_status("get/x/ok/64", &pulse_axis()).is_err());
    }

    #[test]
    fn ack_detection() {
        assert!(is_ack("put/bl_41in_x/ok/0"));
        assert!(is_ack("put/bl_41in_x/ok/0\n"));
        assert!(!is_ack("put/bl_41in_x/ng/-1"));
        assert!(!is_ack("put/bl_41in_x/ok/10"));
    }

    #[test]
    fn position_verb_by_axis_kind() {
        assert_eq!(position_verb(&Axis::new("mono_angle")), "angle");
        assert_eq!(position_verb(&Axis::new("th").with_unit(Unit::Deg)), "angle");
        assert_eq!(position_verb(&Axis::new("slit_width")), "aperture");
        assert_eq!(position_verb(&Axis::new("stage_x")), "position");
    }

    fn local_link(port: u16, timeout_ms: u64) -> TcpLink {
        TcpLink::new(
            Endpoint {
                host: "127.0.0.1".into(),
                port,
                bl_object: "bl_test".into(),
            },
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn refused_connection_maps_to_link_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = local_link(port, 500)
            .fetch_state_and_position(&pulse_axis())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkRefused);
    }

    #[tokio::test]
    async fn silent_controller_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(sock);
        });
        let err = local_link(port, 100)
            .put_stop(&pulse_axis())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LinkTimeout);
        server.abort();
    }
}
