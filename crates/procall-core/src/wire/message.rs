//! Call request and call response messages.
//!
//! ```text
//! Request:  [u8 kind=1][u64 request_id][string collection][string function]
//!           [u32 arg_count][arg_count x Value]
//! Response: [u8 kind=2][u64 request_id][u32 status_code]
//!           [u32 result_count][result_count x Value]
//! string:   [u32 length][UTF-8 bytes]
//! ```

use super::codec::{encode_value, encoded_len, put_len_prefixed, WireReader};
use crate::config::WireConfig;
use crate::status::StatusCode;
use crate::value::Value;
use crate::{ProcallError, Result};
use bytes::{BufMut, Bytes, BytesMut};

const KIND_REQUEST: u8 = 1;
const KIND_RESPONSE: u8 = 2;

/// A call issued by the client stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub request_id: u64,
    pub collection: String,
    pub function: String,
    pub args: Vec<Value>,
}

impl CallRequest {
    pub fn new(
        request_id: u64,
        collection: impl Into<String>,
        function: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            request_id,
            collection: collection.into(),
            function: function.into(),
            args,
        }
    }

    /// `Collection.Function`, for log lines.
    pub fn target(&self) -> String {
        format!("{}.{}", self.collection, self.function)
    }
}

/// The reply to exactly one [`CallRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub request_id: u64,
    pub status: StatusCode,
    pub results: Vec<Value>,
}

impl CallResponse {
    pub fn ok(request_id: u64, results: Vec<Value>) -> Self {
        Self {
            request_id,
            status: StatusCode::Ok,
            results,
        }
    }

    /// A failed reply carrying a single human-readable message value.
    pub fn error(request_id: u64, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            results: vec![Value::String(message.into())],
        }
    }

    /// Split into the caller-facing result: values on `Ok`, a structured
    /// error for every other status.
    pub fn into_result(self) -> Result<Vec<Value>> {
        if self.status.is_ok() {
            Ok(self.results)
        } else {
            Err(ProcallError::from_response(self.status, self.results))
        }
    }
}

/// Any message that travels inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(CallRequest),
    Response(CallResponse),
}

impl Message {
    pub fn request_id(&self) -> u64 {
        match self {
            Message::Request(req) => req.request_id,
            Message::Response(resp) => resp.request_id,
        }
    }

    /// Encode into a frame payload.
    ///
    /// Fails with `FrameTooLarge` when the payload would not fit in a frame.
    pub fn encode(&self) -> Result<Bytes> {
        let size = self.encoded_len();
        if size > WireConfig::MAX_FRAME_SIZE {
            return Err(ProcallError::FrameTooLarge {
                size,
                max: WireConfig::MAX_FRAME_SIZE,
            });
        }
        let values = match self {
            Message::Request(req) => &req.args,
            Message::Response(resp) => &resp.results,
        };
        if values.len() > WireConfig::MAX_VALUES_PER_MESSAGE {
            return Err(ProcallError::Config {
                message: format!(
                    "{} values exceed the per-message maximum {}",
                    values.len(),
                    WireConfig::MAX_VALUES_PER_MESSAGE
                ),
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        match self {
            Message::Request(req) => {
                buf.put_u8(KIND_REQUEST);
                buf.put_u64_le(req.request_id);
                put_len_prefixed(&mut buf, req.collection.as_bytes());
                put_len_prefixed(&mut buf, req.function.as_bytes());
            }
            Message::Response(resp) => {
                buf.put_u8(KIND_RESPONSE);
                buf.put_u64_le(resp.request_id);
                buf.put_u32_le(resp.status.as_u32());
            }
        }
        buf.put_u32_le(values.len() as u32);
        for value in values {
            encode_value(value, &mut buf);
        }
        Ok(buf.freeze())
    }

    /// Decode a complete frame payload.
    ///
    /// The payload must contain exactly one message; trailing bytes mean the
    /// peer and this process disagree about the format.
    pub fn decode(payload: &[u8]) -> Result<Message> {
        let mut reader = WireReader::new(payload);
        let message = match reader.read_u8("message kind")? {
            KIND_REQUEST => {
                let request_id = reader.read_u64("request id")?;
                let collection = reader.read_string("collection name")?;
                let function = reader.read_string("function name")?;
                let args = reader.read_values("argument count")?;
                Message::Request(CallRequest {
                    request_id,
                    collection,
                    function,
                    args,
                })
            }
            KIND_RESPONSE => {
                let request_id = reader.read_u64("request id")?;
                let status = StatusCode::from_u32(reader.read_u32("status code")?);
                let results = reader.read_values("result count")?;
                Message::Response(CallResponse {
                    request_id,
                    status,
                    results,
                })
            }
            other => {
                return Err(ProcallError::malformed(format!(
                    "unknown message kind {:#04x}",
                    other
                )))
            }
        };
        if reader.remaining() != 0 {
            return Err(ProcallError::malformed(format!(
                "{} trailing bytes after message",
                reader.remaining()
            )));
        }
        Ok(message)
    }

    fn encoded_len(&self) -> usize {
        let (header, values) = match self {
            Message::Request(req) => (
                1 + 8 + 4 + req.collection.len() + 4 + req.function.len(),
                &req.args,
            ),
            Message::Response(resp) => (1 + 8 + 4, &resp.results),
        };
        header + 4 + values.iter().map(encoded_len).sum::<usize>()
    }
}

impl From<CallRequest> for Message {
    fn from(req: CallRequest) -> Self {
        Message::Request(req)
    }
}

impl From<CallResponse> for Message {
    fn from(resp: CallResponse) -> Self {
        Message::Response(resp)
    }
}
