use serde_json::{Map, Number, Value};

use crate::abi::registry::{AbiType, Builtin, TypeExpr, TypeRegistry};
use crate::error::ProtocolError;
use crate::wire::BinReader;

/// Nested structs, arrays and variants beyond this depth are rejected.
pub const MAX_DEPTH: usize = 32;

/// 2000-01-01T00:00:00Z in milliseconds, origin of `block_timestamp_type`.
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
const BLOCK_INTERVAL_MS: i64 = 500;

impl TypeRegistry {
    /// Decodes `data` as `type_name` into the JSON form nodes use.
    pub fn bin_to_json(&self, type_name: &str, data: &[u8]) -> Result<Value, ProtocolError> {
        self.read_json(type_name, &mut BinReader::new(data))
    }

    pub fn read_json(
        &self,
        type_name: &str,
        reader: &mut BinReader,
    ) -> Result<Value, ProtocolError> {
        self.read_value(type_name, reader, 0)
    }

    fn read_value(
        &self,
        type_name: &str,
        reader: &mut BinReader,
        depth: usize,
    ) -> Result<Value, ProtocolError> {
        if depth >= MAX_DEPTH {
            return Err(ProtocolError::RecursionLimit);
        }
        match TypeExpr::parse(type_name) {
            TypeExpr::Optional(inner) => {
                if reader.read_bool()? {
                    self.read_value(inner, reader, depth + 1)
                } else {
                    Ok(Value::Null)
                }
            }
            TypeExpr::Array(inner) => {
                let len = reader.read_varuint32()? as usize;
                let mut items = Vec::with_capacity(len.min(reader.remaining()));
                for _ in 0..len {
                    items.push(self.read_value(inner, reader, depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            TypeExpr::Extension(inner) => {
                if reader.remaining() == 0 {
                    Ok(Value::Null)
                } else {
                    self.read_value(inner, reader, depth + 1)
                }
            }
            TypeExpr::Named(name) => match self.get(name)? {
                AbiType::Builtin(builtin) => read_builtin(*builtin, reader),
                AbiType::Alias(target) => self.read_value(target, reader, depth + 1),
                AbiType::Struct(fields) => {
                    let mut object = Map::new();
                    for field in fields {
                        // absent binary extensions are left out entirely
                        if field.type_name.ends_with('$') && reader.remaining() == 0 {
                            break;
                        }
                        let value = self.read_value(&field.type_name, reader, depth + 1)?;
                        object.insert(field.name.clone(), value);
                    }
                    Ok(Value::Object(object))
                }
                AbiType::Variant(cases) => {
                    let index = reader.read_varuint32()?;
                    let case = cases.get(index as usize).ok_or_else(|| {
                        ProtocolError::InvalidVariantIndex {
                            variant: name.to_string(),
                            index,
                        }
                    })?;
                    let value = self.read_value(case, reader, depth + 1)?;
                    Ok(Value::Array(vec![Value::String(case.clone()), value]))
                }
            },
        }
    }
}

fn read_builtin(builtin: Builtin, reader: &mut BinReader) -> Result<Value, ProtocolError> {
    let value = match builtin {
        Builtin::Bool => Value::Bool(reader.read_bool()?),
        Builtin::Int8 => Value::from(reader.read_i8()?),
        Builtin::Uint8 => Value::from(reader.read_u8()?),
        Builtin::Int16 => Value::from(reader.read_i16()?),
        Builtin::Uint16 => Value::from(reader.read_u16()?),
        Builtin::Int32 => Value::from(reader.read_i32()?),
        Builtin::Uint32 => Value::from(reader.read_u32()?),
        // 64 and 128 bit integers do not survive a round trip through
        // javascript numbers
        Builtin::Int64 => Value::String(reader.read_i64()?.to_string()),
        Builtin::Uint64 => Value::String(reader.read_u64()?.to_string()),
        Builtin::Int128 => Value::String(reader.read_i128()?.to_string()),
        Builtin::Uint128 => Value::String(reader.read_u128()?.to_string()),
        Builtin::Varint32 => Value::from(reader.read_varint32()?),
        Builtin::Varuint32 => Value::from(reader.read_varuint32()?),
        Builtin::Float32 => float_value(f64::from(reader.read_f32()?)),
        Builtin::Float64 => float_value(reader.read_f64()?),
        Builtin::Float128 => Value::String(hex::encode(reader.read_bytes(16)?)),
        Builtin::TimePoint => {
            let micros = reader.read_i64()?;
            time_value(micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000) * 1_000)
        }
        Builtin::TimePointSec => time_value(i64::from(reader.read_u32()?), 0),
        Builtin::BlockTimestamp => {
            let ms = i64::from(reader.read_u32()?) * BLOCK_INTERVAL_MS + BLOCK_TIMESTAMP_EPOCH_MS;
            time_value(ms / 1_000, (ms % 1_000) * 1_000_000)
        }
        Builtin::Name => Value::String(name_to_string(reader.read_u64()?)),
        Builtin::Bytes => Value::String(hex::encode(reader.read_blob()?)),
        Builtin::String => Value::String(reader.read_string()?),
        Builtin::Checksum160 => Value::String(hex::encode(reader.read_bytes(20)?)),
        Builtin::Checksum256 => Value::String(hex::encode(reader.read_bytes(32)?)),
        Builtin::Checksum512 => Value::String(hex::encode(reader.read_bytes(64)?)),
        Builtin::PublicKey => Value::String(read_public_key(reader)?),
        Builtin::Signature => Value::String(read_signature(reader)?),
        Builtin::SymbolCode => Value::String(symbol_code_to_string(reader.read_u64()?)),
        Builtin::Symbol => Value::String(symbol_to_string(reader.read_u64()?)),
        Builtin::Asset => Value::String(read_asset(reader)?),
        Builtin::ExtendedAsset => {
            let mut object = Map::new();
            object.insert(String::from("quantity"), Value::String(read_asset(reader)?));
            object.insert(
                String::from("contract"),
                Value::String(name_to_string(reader.read_u64()?)),
            );
            Value::Object(object)
        }
    };
    Ok(value)
}

fn float_value(v: f64) -> Value {
    match Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None => Value::String(v.to_string()),
    }
}

fn time_value(secs: i64, nanos: i64) -> Value {
    match chrono::DateTime::from_timestamp(secs, nanos as u32) {
        Some(time) => Value::String(time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
        None => Value::String(secs.to_string()),
    }
}

const NAME_CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Account, action and table names are 64-bit values holding up to 13
/// characters from a 32 character alphabet.
pub fn name_to_string(value: u64) -> String {
    let mut chars = [b'.'; 13];
    let mut tmp = value;
    for i in 0..=12 {
        let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
        chars[12 - i] = NAME_CHARMAP[(tmp & mask) as usize];
        tmp >>= shift;
    }
    let len = chars.iter().rposition(|c| *c != b'.').map_or(0, |p| p + 1);
    String::from_utf8_lossy(&chars[..len]).to_string()
}

fn symbol_code_to_string(mut code: u64) -> String {
    let mut s = String::new();
    while code & 0xff != 0 {
        s.push((code & 0xff) as u8 as char);
        code >>= 8;
    }
    s
}

/// `4,EOS` for a symbol with precision 4 and code EOS.
pub fn symbol_to_string(symbol: u64) -> String {
    format!("{},{}", symbol & 0xff, symbol_code_to_string(symbol >> 8))
}

fn read_asset(reader: &mut BinReader) -> Result<String, ProtocolError> {
    let amount = reader.read_i64()?;
    let symbol = reader.read_u64()?;
    let precision = (symbol & 0xff) as usize;
    let digits = i128::from(amount).abs().to_string();
    let digits = format!("{:0>width$}", digits, width = precision + 1);
    let (int_part, frac_part) = digits.split_at(digits.len() - precision);
    let sign = if amount < 0 { "-" } else { "" };
    let code = symbol_code_to_string(symbol >> 8);
    if precision == 0 {
        Ok(format!("{}{} {}", sign, int_part, code))
    } else {
        Ok(format!("{}{}.{} {}", sign, int_part, frac_part, code))
    }
}

fn key_kind(kind: u32) -> Result<&'static str, ProtocolError> {
    match kind {
        0 => Ok("K1"),
        1 => Ok("R1"),
        2 => Ok("WA"),
        index => Err(ProtocolError::InvalidVariantIndex {
            variant: String::from("key type"),
            index,
        }),
    }
}

fn read_public_key(reader: &mut BinReader) -> Result<String, ProtocolError> {
    let kind = reader.read_varuint32()?;
    let mut data = reader.read_bytes(33)?.to_vec();
    if kind == 2 {
        // user presence flag and relying party id
        data.push(reader.read_u8()?);
        data.extend_from_slice(reader.read_string()?.as_bytes());
    }
    Ok(format!("PUB_{}:{}", key_kind(kind)?, hex::encode(data)))
}

fn read_signature(reader: &mut BinReader) -> Result<String, ProtocolError> {
    let kind = reader.read_varuint32()?;
    let mut data = reader.read_bytes(65)?.to_vec();
    if kind == 2 {
        // authenticator data and client json
        data.extend_from_slice(reader.read_blob()?);
        data.extend_from_slice(reader.read_string()?.as_bytes());
    }
    Ok(format!("SIG_{}:{}", key_kind(kind)?, hex::encode(data)))
}
