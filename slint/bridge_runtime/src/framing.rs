//! Bridge ↔ native over a byte stream: 4-byte big-endian length, then JSON.
//!
//! Used when native code lives behind a pipe or socket rather than in-process.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec;
use crate::driver::Driver;
use crate::error::BridgeError;
use crate::inbound::CallKind;
use crate::transport::NativeTransport;

pub const BRIDGE_TO_NATIVE_CAP: usize = 1_048_576;
pub const NATIVE_TO_BRIDGE_CAP: usize = 65_536;

const DEFAULT_FRAME_QUEUE_CAP: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum BridgeFrame {
    #[serde(rename = "call")]
    Call { call: String },

    #[serde(rename = "reply")]
    Reply { seq: u64, reply: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum NativeFrame {
    #[serde(rename = "call")]
    Call {
        seq: u64,
        #[serde(default)]
        ui: bool,
        call: String,
    },

    #[serde(rename = "return")]
    Return {
        id: String,
        #[serde(default)]
        ret: String,
        #[serde(default)]
        err: String,
    },
}

/// Transport that queues encoded frames for a writer thread.
#[derive(Clone)]
pub struct FrameTransport {
    tx: SyncSender<Vec<u8>>,
}

impl FrameTransport {
    /// Spawns the writer thread. It exits once every clone of the transport is dropped.
    pub fn spawn<W>(writer: W) -> io::Result<(Self, JoinHandle<io::Result<()>>)>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(DEFAULT_FRAME_QUEUE_CAP);
        let handle = thread::Builder::new()
            .name("callbridge-writer".to_string())
            .spawn(move || writer_loop(rx, writer))?;
        Ok((Self { tx }, handle))
    }

    /// Encodes before queueing so a frame the writer could never send is refused
    /// here, while the caller can still cancel its pending call.
    fn push(&self, frame: &BridgeFrame) -> Result<(), BridgeError> {
        let bytes = encode_frame(frame)?;
        self.tx
            .send(bytes)
            .map_err(|_| BridgeError::Transport("frame writer stopped".to_string()))
    }

    pub fn reply(&self, seq: u64, reply: String) -> Result<(), BridgeError> {
        self.push(&BridgeFrame::Reply { seq, reply })
    }
}

impl NativeTransport for FrameTransport {
    fn send(&self, call: String) -> Result<(), BridgeError> {
        self.push(&BridgeFrame::Call { call })
    }
}

pub fn writer_loop(rx: Receiver<Vec<u8>>, mut writer: impl Write) -> io::Result<()> {
    for bytes in rx {
        writer.write_all(&bytes)?;
        writer.flush()?;
    }

    Ok(())
}

/// Reads native frames until EOF and routes them through `driver`. Replies to
/// synchronous native calls go out through `replies`.
pub fn serve(mut reader: impl Read, driver: &Driver, replies: &FrameTransport) -> io::Result<()> {
    while let Some(payload) = read_payload(&mut reader, NATIVE_TO_BRIDGE_CAP)? {
        let frame: NativeFrame = match serde_json::from_slice(&payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("dropping undecodable native frame: {err}");
                continue;
            }
        };

        handle_frame(frame, driver, replies);
    }

    tracing::debug!("native stream closed");
    Ok(())
}

fn handle_frame(frame: NativeFrame, driver: &Driver, replies: &FrameTransport) {
    match frame {
        NativeFrame::Call {
            seq,
            ui: false,
            call,
        } => {
            let reply = match driver.handle_inbound(&call, CallKind::Inline) {
                Ok(Some(reply)) => reply,
                Ok(None) => codec::encode_reply(&Ok(Value::Null)),
                Err(err) => codec::encode_reply(&Err(err.to_string())),
            };

            if let Err(err) = replies.reply(seq, reply) {
                tracing::warn!(seq, "failed to queue reply: {err}");
            }
        }
        NativeFrame::Call { ui: true, call, .. } => {
            if let Err(err) = driver.handle_inbound(&call, CallKind::UiAffine) {
                tracing::warn!("ui call rejected: {err}");
            }
        }
        NativeFrame::Return { id, ret, err } => {
            if let Err(resolve_err) = driver.resolve_raw(&id, &ret, &err) {
                tracing::warn!(correlation = %id, "native return rejected: {resolve_err}");
            }
        }
    }
}

/// Length prefix plus JSON body, refused when the body exceeds what native
/// code accepts.
fn encode_frame(frame: &BridgeFrame) -> Result<Vec<u8>, BridgeError> {
    let body = serde_json::to_vec(frame)
        .map_err(|err| BridgeError::Transport(format!("unencodable frame: {err}")))?;
    if body.len() > BRIDGE_TO_NATIVE_CAP {
        return Err(BridgeError::Transport(format!(
            "frame of {} bytes exceeds the {BRIDGE_TO_NATIVE_CAP}-byte limit",
            body.len()
        )));
    }

    let len = u32::try_from(body.len())
        .map_err(|_| BridgeError::Transport("frame length exceeds u32".to_string()))?;

    let mut bytes = Vec::with_capacity(4 + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Next frame body, or `None` when the stream ends cleanly between frames.
/// Ending inside a frame is `UnexpectedEof`.
fn read_payload(reader: &mut impl Read, max_payload: usize) -> io::Result<Option<Vec<u8>>> {
    let mut prefix = [0_u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a length prefix",
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("native frame of {len} bytes exceeds the {max_payload}-byte limit"),
        ));
    }

    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::HandlerError;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn native_input(frames: &[NativeFrame]) -> Cursor<Vec<u8>> {
        let mut out = Vec::new();
        for frame in frames {
            let body = serde_json::to_vec(frame).unwrap();
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend_from_slice(&body);
        }
        Cursor::new(out)
    }

    fn bridge_output(bytes: Vec<u8>) -> Vec<BridgeFrame> {
        let mut cursor = Cursor::new(bytes);
        let mut frames = Vec::new();
        while let Some(body) = read_payload(&mut cursor, BRIDGE_TO_NATIVE_CAP).unwrap() {
            frames.push(serde_json::from_slice(&body).unwrap());
        }
        frames
    }

    #[test]
    fn reply_frame_carries_big_endian_length() {
        let frame = BridgeFrame::Reply {
            seq: 7,
            reply: codec::encode_reply(&Ok(json!("ok"))),
        };
        let bytes = encode_frame(&frame).unwrap();

        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(bridge_output(bytes), vec![frame]);
    }

    #[test]
    fn stream_end_between_frames_is_clean() {
        let mut input = native_input(&[NativeFrame::Return {
            id: "1".to_string(),
            ret: String::new(),
            err: String::new(),
        }]);

        assert!(read_payload(&mut input, NATIVE_TO_BRIDGE_CAP).unwrap().is_some());
        assert!(read_payload(&mut input, NATIVE_TO_BRIDGE_CAP).unwrap().is_none());
    }

    #[test]
    fn stream_end_inside_a_frame_is_an_error() {
        for partial in [vec![0, 0], vec![0, 0, 0, 9, b'{', b'"']] {
            let err = read_payload(&mut Cursor::new(partial), NATIVE_TO_BRIDGE_CAP)
                .expect_err("truncated frame");
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        }
    }

    #[test]
    fn native_frame_over_the_limit_is_rejected() {
        let len = (NATIVE_TO_BRIDGE_CAP as u32) + 1;
        let err = read_payload(&mut Cursor::new(len.to_be_bytes().to_vec()), NATIVE_TO_BRIDGE_CAP)
            .expect_err("frame too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_call_is_refused_and_the_writer_survives() {
        let out = SharedBuf::default();
        let (transport, writer) = FrameTransport::spawn(out.clone()).unwrap();
        let driver = Driver::new(BridgeConfig::default(), Arc::new(transport.clone()));

        let huge = json!("x".repeat(BRIDGE_TO_NATIVE_CAP + 10));
        let refused = driver.invoke_async("Window.Load", huge, |_| {});
        assert!(matches!(refused, Err(BridgeError::Transport(_))));
        assert_eq!(driver.pending_calls(), 0);

        driver.post("Window.SetStatus", json!("still here")).unwrap();

        drop(driver);
        drop(transport);
        writer.join().unwrap().unwrap();

        let frames = bridge_output(out.0.lock().clone());
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], BridgeFrame::Call { call } if call.contains("still here")));
    }

    #[test]
    fn native_frames_use_tagged_json() {
        let frame: NativeFrame =
            serde_json::from_str(r#"{"t":"return","id":"3","ret":"\"ok\""}"#).unwrap();
        assert_eq!(
            frame,
            NativeFrame::Return {
                id: "3".to_string(),
                ret: r#""ok""#.to_string(),
                err: String::new(),
            }
        );

        let frame: NativeFrame =
            serde_json::from_str(r#"{"t":"call","seq":1,"call":"{}"}"#).unwrap();
        assert!(matches!(frame, NativeFrame::Call { ui: false, .. }));
    }

    #[test]
    fn serve_answers_calls_and_routes_returns() {
        let out = SharedBuf::default();
        let (transport, writer) = FrameTransport::spawn(out.clone()).unwrap();
        let driver = Driver::new(BridgeConfig::default(), Arc::new(transport.clone()));

        let clicks = Arc::new(AtomicUsize::new(0));
        let counter = {
            let clicks = clicks.clone();
            Arc::new(move |method: &str, _: Value| -> Result<Value, HandlerError> {
                match method {
                    "Click" => Ok(json!(clicks.fetch_add(1, Ordering::SeqCst) + 1)),
                    other => Err(HandlerError::unknown_method(other)),
                }
            })
        };
        let btn = driver.registry().create_named("btn", &counter).unwrap();

        let answered = Arc::new(Mutex::new(None));
        let sink = answered.clone();
        let handle = driver
            .invoke_async("Window.Size", Value::Null, move |outcome| {
                *sink.lock() = Some(outcome);
            })
            .unwrap();

        let input = native_input(&[
            NativeFrame::Call {
                seq: 1,
                ui: false,
                call: codec::encode(&format!("{btn}.Click"), &Value::Null, None),
            },
            NativeFrame::Call {
                seq: 2,
                ui: false,
                call: codec::encode("ghost-1.Click", &Value::Null, None),
            },
            NativeFrame::Return {
                id: "404".to_string(),
                ret: String::new(),
                err: String::new(),
            },
            NativeFrame::Return {
                id: handle.id().to_string(),
                ret: r#"{"w":800}"#.to_string(),
                err: String::new(),
            },
        ]);

        serve(input, &driver, &transport).expect("serve until eof");

        assert_eq!(*answered.lock(), Some(Ok(json!({"w": 800}))));
        assert_eq!(clicks.load(Ordering::SeqCst), 1);

        drop(driver);
        drop(transport);
        writer.join().unwrap().unwrap();

        let frames = bridge_output(out.0.lock().clone());
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], BridgeFrame::Call { call } if call.contains("Window.Size")));
        assert_eq!(
            frames[1],
            BridgeFrame::Reply {
                seq: 1,
                reply: codec::encode_reply(&Ok(json!(1))),
            }
        );
        match &frames[2] {
            BridgeFrame::Reply { seq: 2, reply } => {
                let decoded = codec::decode_reply(reply).unwrap();
                assert!(decoded.unwrap_err().contains("ghost-1"));
            }
            other => panic!("expected reply to seq 2, got {other:?}"),
        }
    }
}
