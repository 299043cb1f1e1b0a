//! Container-depth pre-check for pickle payloads.
//!
//! `serde_pickle` builds its own value tree for the whole payload before serde sees any of it,
//! and that tree is dropped recursively. [`check_nesting`] replays the opcode stream with the
//! same stack and memo discipline, tracking only how deeply containers are nested in memory,
//! and rejects the payload before any tree is built.
//!
//! Only the opcodes of plain data pickles are accepted: scalars, strings, bytes, tuples, lists,
//! dicts, sets and memo traffic. Globals and object construction are refused.

use std::collections::HashMap;
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NestingError {
    TooDeep,
    Unsupported(u8),
    Malformed(&'static str),
}

impl std::fmt::Display for NestingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooDeep => write!(f, "container nesting too deep"),
            Self::Unsupported(op) => write!(f, "unsupported pickle opcode 0x{:02x}", op),
            Self::Malformed(what) => write!(f, "malformed pickle: {}", what),
        }
    }
}

mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const FLOAT: u8 = b'F';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const LONG: u8 = b'L';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

/// One stack entry. A memo reference stays shallow in memory no matter what it points at.
#[derive(Debug, Clone, Copy)]
struct Slot {
    depth: usize,
    memo: Option<u32>,
}

impl Slot {
    const LEAF: Slot = Slot {
        depth: 0,
        memo: None,
    };

    fn reference(id: u32) -> Self {
        Self {
            depth: 0,
            memo: Some(id),
        }
    }

    /// Depth this entry contributes once stored inside a container.
    fn nested(&self) -> usize {
        match self.memo {
            Some(_) => 0,
            None => self.depth,
        }
    }
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    limit: usize,
    stack: Vec<Slot>,
    stacks: Vec<Vec<Slot>>,
    memo: HashMap<u32, usize>,
}

/// Fails with [`NestingError::TooDeep`] when any container in `bytes` would sit more than
/// `limit` levels deep in the decoder's intermediate tree.
pub(crate) fn check_nesting(bytes: &[u8], limit: usize) -> Result<(), NestingError> {
    Scanner {
        bytes,
        pos: 0,
        limit,
        stack: Vec::new(),
        stacks: Vec::new(),
        memo: HashMap::new(),
    }
    .run()
}

impl Scanner<'_> {
    fn run(&mut self) -> Result<(), NestingError> {
        loop {
            match self.byte()? {
                op::PROTO => {
                    self.take(1)?;
                }
                op::FRAME => {
                    self.take(8)?;
                }
                op::STOP => return Ok(()),
                op::MARK => {
                    let stack = mem::take(&mut self.stack);
                    self.stacks.push(stack);
                }
                op::POP => {
                    if self.stack.is_empty() {
                        self.pop_mark()?;
                    } else {
                        self.pop()?;
                    }
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let depth = self.resolved_top()?;
                    self.stack.push(Slot { depth, memo: None });
                }

                op::PUT => {
                    let id = self.line_id()?;
                    self.memoize(id)?;
                }
                op::BINPUT => {
                    let id = self.byte()?.into();
                    self.memoize(id)?;
                }
                op::LONG_BINPUT => {
                    let id = self.u32_le()?;
                    self.memoize(id)?;
                }
                op::MEMOIZE => {
                    let id = u32::try_from(self.memo.len())
                        .map_err(|_| NestingError::Malformed("memo overflow"))?;
                    self.memoize(id)?;
                }
                op::GET => {
                    let id = self.line_id()?;
                    self.get(id)?;
                }
                op::BINGET => {
                    let id = self.byte()?.into();
                    self.get(id)?;
                }
                op::LONG_BINGET => {
                    let id = self.u32_le()?;
                    self.get(id)?;
                }

                op::NONE | op::NEWTRUE | op::NEWFALSE => self.stack.push(Slot::LEAF),
                op::INT | op::LONG | op::FLOAT | op::STRING | op::UNICODE => {
                    self.line()?;
                    self.stack.push(Slot::LEAF);
                }
                op::BINFLOAT => self.leaf(8)?,
                op::BININT => self.leaf(4)?,
                op::BININT1 => self.leaf(1)?,
                op::BININT2 => self.leaf(2)?,
                op::LONG1 | op::SHORT_BINBYTES | op::SHORT_BINSTRING | op::SHORT_BINUNICODE => {
                    let len = self.byte()?.into();
                    self.leaf(len)?;
                }
                op::LONG4 | op::BINSTRING => {
                    let len = usize::try_from(self.i32_le()?)
                        .map_err(|_| NestingError::Malformed("negative length"))?;
                    self.leaf(len)?;
                }
                op::BINBYTES | op::BINUNICODE => {
                    let len = self.u32_le()? as usize;
                    self.leaf(len)?;
                }
                op::BINBYTES8 | op::BINUNICODE8 | op::BYTEARRAY8 => {
                    let len = usize::try_from(self.u64_le()?)
                        .map_err(|_| NestingError::Malformed("length overflow"))?;
                    self.leaf(len)?;
                }

                op::EMPTY_TUPLE | op::EMPTY_LIST | op::EMPTY_DICT | op::EMPTY_SET => {
                    self.push_container(0)?;
                }
                op::TUPLE1 => self.wrap(1)?,
                op::TUPLE2 => self.wrap(2)?,
                op::TUPLE3 => self.wrap(3)?,
                op::TUPLE | op::LIST | op::DICT | op::FROZENSET => {
                    let items = self.pop_mark()?;
                    self.push_container(deepest(&items))?;
                }
                op::APPEND => {
                    let item = self.pop()?;
                    self.extend_top(item.nested())?;
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.extend_top(key.nested().max(value.nested()))?;
                }
                op::APPENDS | op::SETITEMS | op::ADDITEMS => {
                    let items = self.pop_mark()?;
                    self.extend_top(deepest(&items))?;
                }

                other => return Err(NestingError::Unsupported(other)),
            }
        }
    }

    fn take(&mut self, len: usize) -> Result<&[u8], NestingError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(NestingError::Malformed("unexpected end of data"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, NestingError> {
        Ok(self.take(1)?[0])
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], NestingError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32_le(&mut self) -> Result<u32, NestingError> {
        Ok(u32::from_le_bytes(self.fixed()?))
    }

    fn i32_le(&mut self) -> Result<i32, NestingError> {
        Ok(i32::from_le_bytes(self.fixed()?))
    }

    fn u64_le(&mut self) -> Result<u64, NestingError> {
        Ok(u64::from_le_bytes(self.fixed()?))
    }

    fn line(&mut self) -> Result<&[u8], NestingError> {
        let rest = &self.bytes[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(NestingError::Malformed("unterminated line"))?;
        let line = self.take(len + 1)?;
        Ok(&line[..len])
    }

    fn line_id(&mut self) -> Result<u32, NestingError> {
        let line = self.line()?;
        std::str::from_utf8(line)
            .ok()
            .and_then(|text| text.trim_end_matches('\r').parse().ok())
            .ok_or(NestingError::Malformed("invalid memo id"))
    }

    fn leaf(&mut self, len: usize) -> Result<(), NestingError> {
        self.take(len)?;
        self.stack.push(Slot::LEAF);
        Ok(())
    }

    fn pop(&mut self) -> Result<Slot, NestingError> {
        self.stack
            .pop()
            .ok_or(NestingError::Malformed("stack underflow"))
    }

    fn pop_mark(&mut self) -> Result<Vec<Slot>, NestingError> {
        let outer = self
            .stacks
            .pop()
            .ok_or(NestingError::Malformed("no mark on the stack"))?;
        Ok(mem::replace(&mut self.stack, outer))
    }

    fn check(&self, depth: usize) -> Result<usize, NestingError> {
        if depth > self.limit {
            Err(NestingError::TooDeep)
        } else {
            Ok(depth)
        }
    }

    fn push_container(&mut self, deepest_item: usize) -> Result<(), NestingError> {
        let depth = self.check(deepest_item + 1)?;
        self.stack.push(Slot { depth, memo: None });
        Ok(())
    }

    fn wrap(&mut self, count: usize) -> Result<(), NestingError> {
        let mut deepest_item = 0;
        for _ in 0..count {
            deepest_item = deepest_item.max(self.pop()?.nested());
        }
        self.push_container(deepest_item)
    }

    /// Grows the stack-top container, which lives in the memo when the top is a reference.
    fn extend_top(&mut self, deepest_item: usize) -> Result<(), NestingError> {
        let depth = self.check(deepest_item + 1)?;
        let top = self
            .stack
            .last_mut()
            .ok_or(NestingError::Malformed("stack underflow"))?;
        let current = match top.memo {
            Some(id) => self
                .memo
                .get_mut(&id)
                .ok_or(NestingError::Malformed("missing memo entry"))?,
            None => &mut top.depth,
        };
        *current = (*current).max(depth);
        Ok(())
    }

    fn resolved_top(&self) -> Result<usize, NestingError> {
        let top = self
            .stack
            .last()
            .ok_or(NestingError::Malformed("stack underflow"))?;
        match top.memo {
            Some(id) => self
                .memo
                .get(&id)
                .copied()
                .ok_or(NestingError::Malformed("missing memo entry")),
            None => Ok(top.depth),
        }
    }

    fn memoize(&mut self, id: u32) -> Result<(), NestingError> {
        let depth = self.resolved_top()?;
        self.pop()?;
        self.memo.insert(id, depth);
        self.stack.push(Slot::reference(id));
        Ok(())
    }

    fn get(&mut self, id: u32) -> Result<(), NestingError> {
        if !self.memo.contains_key(&id) {
            return Err(NestingError::Malformed("missing memo entry"));
        }
        self.stack.push(Slot::reference(id));
        Ok(())
    }
}

fn deepest(items: &[Slot]) -> usize {
    items.iter().map(Slot::nested).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pickle(body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![op::PROTO, 3];
        bytes.extend_from_slice(body);
        bytes.push(op::STOP);
        bytes
    }

    #[test]
    fn test_serde_pickle_output_passes() {
        let nested = vec![vec![vec![1.0_f64]], vec![]];
        let bytes = serde_pickle::to_vec(&nested, serde_pickle::SerOptions::new()).unwrap();
        assert_eq!(check_nesting(&bytes, 3), Ok(()));
        assert_eq!(check_nesting(&bytes, 2), Err(NestingError::TooDeep));
    }

    #[test]
    fn test_stacked_appends_are_counted() {
        let mut body = vec![op::EMPTY_LIST; 50];
        body.extend(std::iter::repeat(op::APPEND).take(49));
        assert_eq!(check_nesting(&pickle(&body), 50), Ok(()));
        assert_eq!(check_nesting(&pickle(&body), 49), Err(NestingError::TooDeep));
    }

    #[test]
    fn test_single_item_tuples_are_counted() {
        let mut body = vec![op::EMPTY_LIST];
        body.extend(std::iter::repeat(op::TUPLE1).take(100_000));
        assert_eq!(check_nesting(&pickle(&body), 64), Err(NestingError::TooDeep));
    }

    #[test]
    fn test_memo_references_stay_shallow() {
        // [[]] memoized as 0, then [ref0, ref0]: the in-memory tree is two levels deep.
        let body = [
            op::EMPTY_LIST,
            op::EMPTY_LIST,
            op::APPEND,
            op::BINPUT,
            0,
            op::POP,
            op::EMPTY_LIST,
            op::BINGET,
            0,
            op::APPEND,
            op::BINGET,
            0,
            op::APPEND,
        ];
        assert_eq!(check_nesting(&pickle(&body), 2), Ok(()));
    }

    #[test]
    fn test_growing_a_memoized_container_is_counted() {
        // Memoize an empty list, then nest two levels into it through the reference.
        let body = [
            op::EMPTY_LIST,
            op::BINPUT,
            7,
            op::EMPTY_LIST,
            op::EMPTY_LIST,
            op::APPEND,
            op::APPEND,
        ];
        assert_eq!(check_nesting(&pickle(&body), 2), Err(NestingError::TooDeep));
        assert_eq!(check_nesting(&pickle(&body), 3), Ok(()));
    }

    #[test]
    fn test_object_opcodes_are_refused() {
        assert_eq!(
            check_nesting(&pickle(b"cbuiltins\nset\n"), 8),
            Err(NestingError::Unsupported(b'c'))
        );
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        assert!(matches!(
            check_nesting(&[op::PROTO, 3, op::BINUNICODE, 9, 0, 0, 0, b'a'], 8),
            Err(NestingError::Malformed(_))
        ));
    }
}
