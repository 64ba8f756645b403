/// OP_RETURN Payload Decoder
///
/// Scans transaction outputs for OP_RETURN scripts, extracts the single data
/// push, and parses it as strict UTF-8 JSON. A payload is a candidate only
/// when its `p` field matches the configured protocol tag; everything else on
/// the chain is skipped without logging. Candidates that fail structurally
/// are forwarded to the router marked invalid so their rejection lands in the
/// operation log at a deterministic position.
///
/// A single OP_RETURN may carry a top-level array of operations; each element
/// is an independent operation sharing the parent transaction. Multiple
/// OP_RETURN outputs concatenate their operation lists in output order.
/// `sub_index` is assigned sequentially across the whole transaction.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::constants::{
    is_direct_push, MAX_OPS_PER_TX, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4, OP_RETURN,
};
use crate::types::{ErrorCode, OpPayload, Transaction};

/// One decoded operation slot within a transaction. `structural_error` set
/// means the operation is logged invalid without touching a processor's
/// validation logic; `op` and `tick` are best-effort for the log entry.
#[derive(Debug, Clone)]
pub struct DecodedOp {
    pub sub_index: u32,
    pub op: Option<String>,
    pub tick: Option<String>,
    pub payload: Option<OpPayload>,
    pub structural_error: Option<ErrorCode>,
    pub raw: Vec<u8>,
}

impl DecodedOp {
    fn structurally_invalid(
        sub_index: u32,
        code: ErrorCode,
        op: Option<String>,
        tick: Option<String>,
        raw: Vec<u8>,
    ) -> Self {
        DecodedOp {
            sub_index,
            op,
            tick,
            payload: None,
            structural_error: Some(code),
            raw,
        }
    }
}

/// Extract the data push from an OP_RETURN scriptPubKey. Returns None for
/// non-OP_RETURN scripts, bare OP_RETURN, or scripts that do not consist of
/// exactly one push after the opcode.
pub fn op_return_push(script: &[u8]) -> Option<Vec<u8>> {
    if script.first() != Some(&OP_RETURN) {
        return None;
    }
    let rest = &script[1..];
    if rest.is_empty() {
        return None;
    }

    let opcode = rest[0];
    let (len, data_start) = if is_direct_push(opcode) {
        (opcode as usize, 1)
    } else if opcode == OP_PUSHDATA1 {
        if rest.len() < 2 {
            return None;
        }
        (rest[1] as usize, 2)
    } else if opcode == OP_PUSHDATA2 {
        if rest.len() < 3 {
            return None;
        }
        (u16::from_le_bytes([rest[1], rest[2]]) as usize, 3)
    } else if opcode == OP_PUSHDATA4 {
        if rest.len() < 5 {
            return None;
        }
        (
            u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]) as usize,
            5,
        )
    } else {
        return None;
    };

    let data = rest.get(data_start..data_start + len)?;
    // Trailing opcodes after the push disqualify the script as a payload
    // carrier.
    if data_start + len != rest.len() {
        return None;
    }
    Some(data.to_vec())
}

/// JSON value wrapper whose Deserialize impl rejects duplicate object keys
/// at every nesting level. serde_json's own Value keeps the last duplicate
/// silently, which would make replay depend on parser internals.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StrictVisitor;

        impl<'de> Visitor<'de> for StrictVisitor {
            type Value = StrictValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictValue(Value::Bool(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictValue(Value::Number(v.into())))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictValue(Value::Number(v.into())))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                serde_json::Number::from_f64(v)
                    .map(|n| StrictValue(Value::Number(n)))
                    .ok_or_else(|| E::custom("non-finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictValue(Value::String(v.to_owned())))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictValue(Value::String(v)))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(StrictValue(Value::Null))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(StrictValue(v)) = seq.next_element()? {
                    items.push(v);
                }
                Ok(StrictValue(Value::Array(items)))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut object = Map::new();
                while let Some(key) = map.next_key::<String>()? {
                    let StrictValue(value) = map.next_value()?;
                    if object.insert(key.clone(), value).is_some() {
                        return Err(de::Error::custom(format!("duplicate key: {}", key)));
                    }
                }
                Ok(StrictValue(Value::Object(object)))
            }
        }

        deserializer.deserialize_any(StrictVisitor)
    }
}

/// Parse payload bytes as strict JSON: valid UTF-8, no duplicate keys, no
/// trailing bytes after the document.
pub fn parse_strict_json(bytes: &[u8]) -> Result<Value, ErrorCode> {
    let text = std::str::from_utf8(bytes).map_err(|_| ErrorCode::UnsupportedEncoding)?;
    let mut de = serde_json::Deserializer::from_str(text);
    let value = StrictValue::deserialize(&mut de)
        .map_err(|_| ErrorCode::MalformedJson)?
        .0;
    de.end().map_err(|_| ErrorCode::MalformedJson)?;
    Ok(value)
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(|s| s.to_owned())
}

/// Whether a payload object belongs to our protocol family. The tag match
/// is case-insensitive; everything else is another protocol's traffic.
fn is_candidate(obj: &Map<String, Value>, protocol_tag: &str) -> bool {
    match obj.get("p").and_then(|v| v.as_str()) {
        Some(p) => p.eq_ignore_ascii_case(protocol_tag),
        None => false,
    }
}

/// Turn one candidate object into a decoded operation slot, catching the
/// structural problems the router must log (`op` not a string, `tick`
/// missing).
fn decode_candidate(obj: Map<String, Value>, raw: &[u8], sub_index: u32) -> DecodedOp {
    let p = string_field(&obj, "p").unwrap_or_default();
    let op = match obj.get("op") {
        Some(Value::String(s)) => s.to_lowercase(),
        _ => {
            return DecodedOp::structurally_invalid(
                sub_index,
                ErrorCode::MissingField,
                None,
                string_field(&obj, "tick"),
                raw.to_vec(),
            );
        }
    };
    let tick = match obj.get("tick") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) | None => {
            return DecodedOp::structurally_invalid(
                sub_index,
                ErrorCode::MissingField,
                Some(op),
                None,
                raw.to_vec(),
            );
        }
    };

    let mut extra = obj;
    extra.remove("p");
    extra.remove("op");
    extra.remove("tick");

    DecodedOp {
        sub_index,
        op: Some(op.clone()),
        tick: tick.clone(),
        payload: Some(OpPayload {
            p,
            op,
            tick,
            extra,
            raw: raw.to_vec(),
        }),
        structural_error: None,
        raw: raw.to_vec(),
    }
}

/// Decode every operation carried by a transaction, in canonical order.
///
/// Silent skips (not protocol traffic): non-OP_RETURN outputs, scripts
/// without a single clean push, payloads whose first byte is not `{` or `[`,
/// objects whose `p` does not match. Deterministic rejects: oversized,
/// non-UTF-8 or malformed documents that do start with `{`/`[`, candidates
/// with missing fields, and operations past the per-transaction cap.
pub fn decode_transaction(
    tx: &Transaction,
    protocol_tag: &str,
    payload_max_bytes: usize,
) -> Vec<DecodedOp> {
    let mut ops = Vec::new();
    let mut sub_index: u32 = 0;

    for output in &tx.outputs {
        let data = match op_return_push(&output.script) {
            Some(d) => d,
            None => continue,
        };
        if data.is_empty() {
            continue;
        }
        let looks_like_json = data[0] == b'{' || data[0] == b'[';
        if !looks_like_json {
            continue;
        }

        if data.len() > payload_max_bytes {
            tracing::debug!(
                txid = %tx.txid,
                bytes = data.len(),
                "oversized payload rejected"
            );
            ops.push(DecodedOp::structurally_invalid(
                sub_index,
                ErrorCode::PayloadTooLarge,
                None,
                None,
                data,
            ));
            sub_index += 1;
            continue;
        }

        let value = match parse_strict_json(&data) {
            Ok(v) => v,
            Err(code) => {
                tracing::debug!(txid = %tx.txid, raw = %hex::encode(&data), code = %code, "payload rejected");
                ops.push(DecodedOp::structurally_invalid(
                    sub_index, code, None, None, data,
                ));
                sub_index += 1;
                continue;
            }
        };

        match value {
            Value::Object(obj) => {
                if !is_candidate(&obj, protocol_tag) {
                    continue;
                }
                ops.push(decode_candidate(obj, &data, sub_index));
                sub_index += 1;
            }
            Value::Array(elements) => {
                for element in elements {
                    let obj = match element {
                        Value::Object(obj) => obj,
                        _ => continue,
                    };
                    if !is_candidate(&obj, protocol_tag) {
                        continue;
                    }
                    ops.push(decode_candidate(obj, &data, sub_index));
                    sub_index += 1;
                }
            }
            _ => continue,
        }
    }

    // Cap operations per transaction; the overflow is still logged so replay
    // stays deterministic.
    if ops.len() > MAX_OPS_PER_TX {
        for op in ops.iter_mut().skip(MAX_OPS_PER_TX) {
            if op.structural_error.is_none() {
                op.payload = None;
                op.structural_error = Some(ErrorCode::PayloadTooLarge);
            }
        }
    }

    ops
}

/// Build an OP_RETURN script around a payload. Used by tests and tools.
pub fn build_op_return_script(payload: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_RETURN];
    if payload.len() <= 0x4b {
        script.push(payload.len() as u8);
    } else if payload.len() <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(payload.len() as u8);
    } else {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    }
    script.extend_from_slice(payload);
    script
}
