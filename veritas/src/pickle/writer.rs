use super::OpCode;

/// Low-level pickle encoder.
///
/// Emits opcodes only; callers are responsible for producing a well-formed
/// program. No memo is written, so every object is encoded inline.
#[derive(Debug, Default)]
pub struct PickleWriter {
    buffer: Vec<u8>,
}

impl PickleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn op(
        &mut self,
        op: OpCode,
    ) -> &mut Self {
        self.buffer.push(op as u8);
        self
    }

    pub fn proto(
        &mut self,
        version: u8,
    ) -> &mut Self {
        self.op(OpCode::Proto);
        self.buffer.push(version);
        self
    }

    pub fn stop(&mut self) -> &mut Self {
        self.op(OpCode::Stop)
    }

    pub fn mark(&mut self) -> &mut Self {
        self.op(OpCode::Mark)
    }

    pub fn none(&mut self) -> &mut Self {
        self.op(OpCode::None)
    }

    pub fn bool(
        &mut self,
        value: bool,
    ) -> &mut Self {
        if value {
            self.op(OpCode::NewTrue)
        } else {
            self.op(OpCode::NewFalse)
        }
    }

    /// Uses the narrowest of `BININT1`, `BININT2`, `BININT` and `LONG1`.
    pub fn int(
        &mut self,
        value: i64,
    ) -> &mut Self {
        if let Ok(v) = u8::try_from(value) {
            self.op(OpCode::BinInt1);
            self.buffer.push(v);
        } else if let Ok(v) = u16::try_from(value) {
            self.op(OpCode::BinInt2);
            self.buffer.extend_from_slice(&v.to_le_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.op(OpCode::BinInt);
            self.buffer.extend_from_slice(&v.to_le_bytes());
        } else {
            self.op(OpCode::Long1);
            self.buffer.push(8);
            self.buffer.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    pub fn float(
        &mut self,
        value: f64,
    ) -> &mut Self {
        self.op(OpCode::BinFloat);
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn string(
        &mut self,
        value: &str,
    ) -> &mut Self {
        self.op(OpCode::BinUnicode);
        self.buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(value.as_bytes());
        self
    }

    pub fn global(
        &mut self,
        module: &str,
        name: &str,
    ) -> &mut Self {
        self.op(OpCode::Global);
        self.buffer.extend_from_slice(module.as_bytes());
        self.buffer.push(b'\n');
        self.buffer.extend_from_slice(name.as_bytes());
        self.buffer.push(b'\n');
        self
    }

    pub fn empty_tuple(&mut self) -> &mut Self {
        self.op(OpCode::EmptyTuple)
    }

    /// Collects everything since the last `mark` into a tuple.
    pub fn tuple(&mut self) -> &mut Self {
        self.op(OpCode::Tuple)
    }

    pub fn empty_list(&mut self) -> &mut Self {
        self.op(OpCode::EmptyList)
    }

    pub fn appends(&mut self) -> &mut Self {
        self.op(OpCode::Appends)
    }

    pub fn empty_dict(&mut self) -> &mut Self {
        self.op(OpCode::EmptyDict)
    }

    pub fn setitem(&mut self) -> &mut Self {
        self.op(OpCode::SetItem)
    }

    pub fn setitems(&mut self) -> &mut Self {
        self.op(OpCode::SetItems)
    }

    pub fn reduce(&mut self) -> &mut Self {
        self.op(OpCode::Reduce)
    }

    pub fn build(&mut self) -> &mut Self {
        self.op(OpCode::Build)
    }

    pub fn binpersid(&mut self) -> &mut Self {
        self.op(OpCode::BinPersId)
    }

    /// An empty `collections.OrderedDict()`.
    pub fn ordered_dict(&mut self) -> &mut Self {
        self.global("collections", "OrderedDict").empty_tuple().reduce()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}
