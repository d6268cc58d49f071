use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorRecord;

/// An owned buffer whose ownership moves to the worker with a dispatch.
///
/// In-process contexts hand the same allocation across; process contexts
/// copy it through the pipe. Either way the caller no longer holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transferable(Vec<u8>);

impl Transferable {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Transferable {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Wire-format request sent from the pool to one worker.
///
/// `id` is the correlation id; the worker echoes it on its single reply.
/// `handler` names a registry entry instead of shipping code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: String,
    pub handler: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transfer: Vec<Transferable>,
}

/// Wire-format reply: `{"id": .., "result": ..}` or `{"id": .., "error": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Result(Value),
    Error(ErrorRecord),
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Result(result),
        }
    }

    pub fn error(id: impl Into<String>, error: ErrorRecord) -> Self {
        Self {
            id: id.into(),
            body: ResponseBody::Error(error),
        }
    }

    pub fn into_result(self) -> Result<Value, ErrorRecord> {
        match self.body {
            ResponseBody::Result(v) => Ok(v),
            ResponseBody::Error(e) => Err(e),
        }
    }
}

/// Serialize a message as one JSON line (newline-terminated).
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one JSON line. Trailing whitespace (including `\r\n`) is ignored.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_wire_shape() {
        let ok = serde_json::to_value(Response::ok("0-1", json!(60))).unwrap();
        assert_eq!(ok, json!({"id": "0-1", "result": 60}));

        let err = Response::error("0-2", ErrorRecord::new("Fail", "at job"));
        let err = serde_json::to_value(err).unwrap();
        assert_eq!(
            err,
            json!({"id": "0-2", "error": {"message": "Fail", "stack": "at job"}})
        );
    }

    #[test]
    fn null_result_is_not_an_error() {
        let line = encode_line(&Response::ok("3-a", Value::Null)).unwrap();
        let decoded: Response = decode_line(std::str::from_utf8(&line).unwrap()).unwrap();
        assert_eq!(decoded.into_result(), Ok(Value::Null));
    }

    #[test]
    fn dispatch_omits_empty_transfer() {
        let dispatch = Dispatch {
            id: "1-1".into(),
            handler: "echo".into(),
            payload: json!({"k": 1}),
            transfer: Vec::new(),
        };
        let v = serde_json::to_value(&dispatch).unwrap();
        assert!(v.get("transfer").is_none());

        let with_buf = Dispatch {
            transfer: vec![Transferable::new(vec![1, 2, 3])],
            ..dispatch
        };
        let line = encode_line(&with_buf).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let back: Dispatch = decode_line(std::str::from_utf8(&line).unwrap()).unwrap();
        assert_eq!(back.transfer[0].as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn decode_tolerates_crlf() {
        let d: Dispatch = decode_line("{\"id\":\"1-1\",\"handler\":\"echo\"}\r\n").unwrap();
        assert_eq!(d.payload, Value::Null);
    }
}
