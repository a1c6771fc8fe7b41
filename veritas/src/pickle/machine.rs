use std::{cell::RefCell, collections::HashMap, rc::Rc};

use super::{DictItems, GlobalRef, OpCode, PickleError, Value};

const HIGHEST_PROTOCOL: u8 = 5;

/// Resolves persistent ids (`PERSID`/`BINPERSID`) met while unpickling.
///
/// Every other value is built by the machine itself and passes through
/// untouched.
pub trait PersistentLoad {
    type Error: From<PickleError>;

    fn persistent_load(
        &mut self,
        pid: Value,
    ) -> Result<Value, Self::Error>;
}

/// Unpickles `bytes`, handing persistent ids to `loader`.
pub fn load<L: PersistentLoad>(
    bytes: &[u8],
    loader: &mut L,
) -> Result<Value, L::Error> {
    PickleMachine::new(bytes).run(loader)
}

pub struct PickleMachine<'a> {
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Value>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
    /// Positions of hashable keys per dict, so `SETITEM` replaces in O(1).
    /// Holding the dict keeps its address from being reused.
    dict_keys: HashMap<*const RefCell<Vec<(Value, Value)>>, (DictItems, HashMap<DictKey, usize>)>,
}

/// Keys that compare by value, as Python's `str` and `int` do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DictKey {
    String(String),
    Int(i64),
}

impl DictKey {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(DictKey::String(s.clone())),
            Value::Int(i) => Some(DictKey::Int(*i)),
            _ => None,
        }
    }
}

impl<'a> PickleMachine<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
            dict_keys: HashMap::new(),
        }
    }

    pub fn run<L: PersistentLoad>(
        mut self,
        loader: &mut L,
    ) -> Result<Value, L::Error> {
        while self.pos < self.bytes.len() {
            let position = self.pos;
            let op = OpCode::try_from(self.read_u8()?).map_err(|opcode| {
                PickleError::UnsupportedOpCode {
                    opcode,
                    position,
                }
            })?;
            match op {
                OpCode::Proto => {
                    let protocol = self.read_u8()?;
                    if protocol > HIGHEST_PROTOCOL {
                        return Err(PickleError::UnsupportedProtocol(protocol).into());
                    }
                },
                OpCode::Frame => {
                    // Frames only group opcodes; their contents are read inline.
                    self.take(8)?;
                },
                OpCode::Stop => {
                    return Ok(self.pop()?);
                },
                OpCode::Mark => {
                    self.marks.push(self.stack.len());
                },
                OpCode::Pop => {
                    if self.marks.last() == Some(&self.stack.len()) {
                        self.marks.pop();
                    } else {
                        self.pop()?;
                    }
                },
                OpCode::PopMark => {
                    self.pop_mark(op)?;
                },
                OpCode::Dup => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                },
                OpCode::None => self.stack.push(Value::None),
                OpCode::NewTrue => self.stack.push(Value::Bool(true)),
                OpCode::NewFalse => self.stack.push(Value::Bool(false)),
                OpCode::Int => {
                    let value = match self.read_line()? {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        line => Value::Int(parse_text(line)?),
                    };
                    self.stack.push(value);
                },
                OpCode::BinInt => {
                    let v = self.read_i32_le()?;
                    self.stack.push(Value::Int(v as i64));
                },
                OpCode::BinInt1 => {
                    let v = self.read_u8()?;
                    self.stack.push(Value::Int(v as i64));
                },
                OpCode::BinInt2 => {
                    let v = self.read_u16_le()?;
                    self.stack.push(Value::Int(v as i64));
                },
                OpCode::Long => {
                    let line = self.read_line()?;
                    let v = parse_text(line.trim_end_matches('L'))?;
                    self.stack.push(Value::Int(v));
                },
                OpCode::Long1 => {
                    let len = self.read_u8()? as usize;
                    let v = decode_long(self.take(len)?)?;
                    self.stack.push(Value::Int(v));
                },
                OpCode::Long4 => {
                    let len = self.read_i32_le()?;
                    let len = usize::try_from(len).map_err(|_| {
                        PickleError::InvalidData(format!("negative LONG4 length {len}"))
                    })?;
                    let v = decode_long(self.take(len)?)?;
                    self.stack.push(Value::Int(v));
                },
                OpCode::Float => {
                    let v = parse_text(self.read_line()?)?;
                    self.stack.push(Value::Float(v));
                },
                OpCode::BinFloat => {
                    let v = f64::from_be_bytes(self.read_array()?);
                    self.stack.push(Value::Float(v));
                },
                OpCode::Unicode => {
                    let s = self.read_line()?.to_string();
                    self.stack.push(Value::String(s));
                },
                OpCode::BinUnicode => {
                    let len = self.read_u32_le()? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                },
                OpCode::ShortBinUnicode => {
                    let len = self.read_u8()? as usize;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                },
                OpCode::BinUnicode8 => {
                    let len = self.read_len_u64()?;
                    let s = self.read_utf8(len)?;
                    self.stack.push(Value::String(s));
                },
                OpCode::BinString => {
                    let len = self.read_i32_le()?;
                    let len = usize::try_from(len).map_err(|_| {
                        PickleError::InvalidData(format!("negative BINSTRING length {len}"))
                    })?;
                    let value = legacy_string(self.take(len)?);
                    self.stack.push(value);
                },
                OpCode::ShortBinString => {
                    let len = self.read_u8()? as usize;
                    let value = legacy_string(self.take(len)?);
                    self.stack.push(value);
                },
                OpCode::BinBytes => {
                    let len = self.read_u32_le()? as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                },
                OpCode::ShortBinBytes => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                },
                OpCode::BinBytes8 => {
                    let len = self.read_len_u64()?;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Value::Bytes(bytes));
                },
                OpCode::EmptyTuple => self.stack.push(Value::Tuple(Vec::new())),
                OpCode::Tuple => {
                    let items = self.pop_mark(op)?;
                    self.stack.push(Value::Tuple(items));
                },
                OpCode::Tuple1 => {
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a]));
                },
                OpCode::Tuple2 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b]));
                },
                OpCode::Tuple3 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Value::Tuple(vec![a, b, c]));
                },
                OpCode::EmptyList => self.stack.push(Value::new_list()),
                OpCode::List => {
                    let items = self.pop_mark(op)?;
                    let list = Value::new_list();
                    self.list_extend(op, &list, items)?;
                    self.stack.push(list);
                },
                OpCode::Append => {
                    let value = self.pop()?;
                    let list = self.top()?.clone();
                    self.list_extend(op, &list, vec![value])?;
                },
                OpCode::Appends => {
                    let items = self.pop_mark(op)?;
                    let list = self.top()?.clone();
                    self.list_extend(op, &list, items)?;
                },
                OpCode::EmptyDict => self.stack.push(Value::new_dict()),
                OpCode::Dict => {
                    let items = self.pop_mark(op)?;
                    let dict = Value::new_dict();
                    self.dict_set_items(op, &dict, items)?;
                    self.stack.push(dict);
                },
                OpCode::SetItem => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let dict = self.top()?.clone();
                    self.dict_set_items(op, &dict, vec![key, value])?;
                },
                OpCode::SetItems => {
                    let items = self.pop_mark(op)?;
                    let dict = self.top()?.clone();
                    self.dict_set_items(op, &dict, items)?;
                },
                OpCode::Global => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    self.stack.push(Value::Global(GlobalRef {
                        module,
                        name,
                    }));
                },
                OpCode::StackGlobal => {
                    let name = self.pop_string(op)?;
                    let module = self.pop_string(op)?;
                    self.stack.push(Value::Global(GlobalRef {
                        module,
                        name,
                    }));
                },
                OpCode::Reduce | OpCode::NewObj => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let value = reduce(op, callable, args)?;
                    self.stack.push(value);
                },
                OpCode::Build => {
                    // Instance state is not needed for parameter maps.
                    let _state = self.pop()?;
                    self.top()?;
                },
                OpCode::PersId => {
                    let pid = Value::String(self.read_line()?.to_string());
                    let value = loader.persistent_load(pid)?;
                    self.stack.push(value);
                },
                OpCode::BinPersId => {
                    let pid = self.pop()?;
                    let value = loader.persistent_load(pid)?;
                    self.stack.push(value);
                },
                OpCode::Put => {
                    let idx = parse_text(self.read_line()?)?;
                    self.memo_put(idx)?;
                },
                OpCode::BinPut => {
                    let idx = self.read_u8()? as u32;
                    self.memo_put(idx)?;
                },
                OpCode::LongBinPut => {
                    let idx = self.read_u32_le()?;
                    self.memo_put(idx)?;
                },
                OpCode::Memoize => {
                    let idx = self.memo.len() as u32;
                    self.memo_put(idx)?;
                },
                OpCode::Get => {
                    let idx = parse_text(self.read_line()?)?;
                    let value = self.memo_get(idx)?;
                    self.stack.push(value);
                },
                OpCode::BinGet => {
                    let idx = self.read_u8()? as u32;
                    let value = self.memo_get(idx)?;
                    self.stack.push(value);
                },
                OpCode::LongBinGet => {
                    let idx = self.read_u32_le()?;
                    let value = self.memo_get(idx)?;
                    self.stack.push(value);
                },
            }
        }
        Err(PickleError::MissingStop.into())
    }

    fn list_extend(
        &self,
        op: OpCode,
        list: &Value,
        items: Vec<Value>,
    ) -> Result<(), PickleError> {
        let Value::List(list) = list else {
            return Err(PickleError::UnexpectedValue {
                op,
                expected: "list",
                found: list.type_name(),
            });
        };
        list.borrow_mut().extend(items);
        Ok(())
    }

    fn dict_set_items(
        &mut self,
        op: OpCode,
        dict: &Value,
        items: Vec<Value>,
    ) -> Result<(), PickleError> {
        let Value::Dict(dict) = dict else {
            return Err(PickleError::UnexpectedValue {
                op,
                expected: "dict",
                found: dict.type_name(),
            });
        };
        if items.len() % 2 != 0 {
            return Err(PickleError::InvalidData(format!(
                "{op:?} expected an even number of items, got {}",
                items.len()
            )));
        }
        let (_, positions) = self.dict_keys.entry(Rc::as_ptr(dict)).or_insert_with(|| {
            let positions = dict
                .borrow()
                .iter()
                .enumerate()
                .filter_map(|(position, (key, _))| DictKey::of(key).map(|key| (key, position)))
                .collect();
            (Rc::clone(dict), positions)
        });
        let mut entries = dict.borrow_mut();
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let Some(dict_key) = DictKey::of(&key) else {
                entries.push((key, value));
                continue;
            };
            match positions.get(&dict_key) {
                Some(&position) => entries[position].1 = value,
                None => {
                    positions.insert(dict_key, entries.len());
                    entries.push((key, value));
                },
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, PickleError> {
        if self.marks.last().is_some_and(|&mark| mark >= self.stack.len()) {
            return Err(PickleError::StackUnderflow(self.pos));
        }
        self.stack.pop().ok_or(PickleError::StackUnderflow(self.pos))
    }

    fn top(&self) -> Result<&Value, PickleError> {
        self.stack.last().ok_or(PickleError::StackUnderflow(self.pos))
    }

    fn pop_string(
        &mut self,
        op: OpCode,
    ) -> Result<String, PickleError> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            other => Err(PickleError::UnexpectedValue {
                op,
                expected: "str",
                found: other.type_name(),
            }),
        }
    }

    fn pop_mark(
        &mut self,
        op: OpCode,
    ) -> Result<Vec<Value>, PickleError> {
        let mark = self.marks.pop().ok_or(PickleError::MarkNotFound(op))?;
        if mark > self.stack.len() {
            return Err(PickleError::StackUnderflow(self.pos));
        }
        Ok(self.stack.split_off(mark))
    }

    fn memo_put(
        &mut self,
        idx: u32,
    ) -> Result<(), PickleError> {
        let value = self.top()?.clone();
        self.memo.insert(idx, value);
        Ok(())
    }

    fn memo_get(
        &self,
        idx: u32,
    ) -> Result<Value, PickleError> {
        self.memo.get(&idx).cloned().ok_or(PickleError::MemoNotFound(idx))
    }

    fn take(
        &mut self,
        len: usize,
    ) -> Result<&'a [u8], PickleError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(PickleError::UnexpectedEof(self.pos))?;
        let input = self.bytes;
        let bytes = input
            .get(self.pos..end)
            .ok_or(PickleError::UnexpectedEof(input.len()))?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PickleError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn read_u8(&mut self) -> Result<u8, PickleError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16_le(&mut self) -> Result<u16, PickleError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32_le(&mut self) -> Result<u32, PickleError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_i32_le(&mut self) -> Result<i32, PickleError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_len_u64(&mut self) -> Result<usize, PickleError> {
        let len = u64::from_le_bytes(self.read_array()?);
        usize::try_from(len)
            .map_err(|_| PickleError::InvalidData(format!("length {len} does not fit in memory")))
    }

    fn read_line(&mut self) -> Result<&'a str, PickleError> {
        let input = self.bytes;
        let rest = &input[self.pos..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(PickleError::UnexpectedEof(input.len()))?;
        let line = self.take(newline + 1)?;
        let line = &line[..newline];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        std::str::from_utf8(line)
            .map_err(|e| PickleError::InvalidData(format!("Invalid UTF-8: {e}")))
    }

    fn read_utf8(
        &mut self,
        len: usize,
    ) -> Result<String, PickleError> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| PickleError::InvalidData(format!("Invalid UTF-8: {e}")))
    }
}

fn reduce(
    op: OpCode,
    callable: Value,
    args: Value,
) -> Result<Value, PickleError> {
    let Value::Global(callable) = callable else {
        return Err(PickleError::UnexpectedValue {
            op,
            expected: "global callable",
            found: callable.type_name(),
        });
    };
    let Value::Tuple(args) = args else {
        return Err(PickleError::UnexpectedValue {
            op,
            expected: "argument tuple",
            found: args.type_name(),
        });
    };
    let is_dict_type = callable.is("collections", "OrderedDict")
        || callable.is("builtins", "dict")
        || callable.is("__builtin__", "dict");
    if is_dict_type && args.is_empty() {
        return Ok(Value::new_dict());
    }
    Ok(Value::Reduce {
        callable,
        args,
    })
}

/// Python 2 `str` payloads: text when valid UTF-8, raw bytes otherwise.
fn legacy_string(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

fn parse_text<T: std::str::FromStr>(line: &str) -> Result<T, PickleError> {
    line.trim()
        .parse()
        .map_err(|_| PickleError::InvalidData(format!("cannot parse {line:?} as a number")))
}

/// Little-endian two's complement, as written by `LONG1`/`LONG4`.
fn decode_long(data: &[u8]) -> Result<i64, PickleError> {
    let Some(&last) = data.last() else {
        return Ok(0);
    };
    let negative = last & 0x80 != 0;
    let fill = if negative {
        0xff
    } else {
        0x00
    };
    let mut buf = [fill; 8];
    let n = data.len().min(8);
    buf[..n].copy_from_slice(&data[..n]);
    let value = i64::from_le_bytes(buf);
    let overflow = data.len() > 8
        && (data[8..].iter().any(|&b| b != fill) || (value < 0) != negative);
    if overflow {
        return Err(PickleError::InvalidData(format!(
            "integer of {} bytes does not fit in 64 bits",
            data.len()
        )));
    }
    Ok(value)
}
