//! file: core/src/vm/bytecode.rs
//! description: parser for the binary startup-program format.

use std::io::{Cursor, Read};

use crate::ir::bytecode::{MAGIC, VERSION};
use crate::ir::op::{ConstVal, FactoryKind, Local, Op};
use crate::ir::program::{Proc, Program};

pub fn parse_program(bytes: &[u8]) -> Result<Program, String> {
    let mut cur = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic).map_err(|e| format!("missing header: {}", e))?;
    if &magic != MAGIC {
        return Err("invalid magic".to_string());
    }
    let version = read_u32(&mut cur)?;
    if version != VERSION {
        return Err(format!("unsupported version {}", version));
    }

    let class_name = read_string(&mut cur)?;
    let proc_count = read_u32(&mut cur)? as usize;
    let mut procs = Vec::with_capacity(proc_count);
    for _ in 0..proc_count {
        let name = read_string(&mut cur)?;
        let groups = read_u32(&mut cur)? as usize;
        let op_count = read_u32(&mut cur)? as usize;
        let mut ops = Vec::with_capacity(op_count);
        for i in 0..op_count {
            ops.push(read_op(&mut cur).map_err(|e| format!("op {} of '{}': {}", i, name, e))?);
        }
        procs.push(Proc { name, ops, groups });
    }

    Ok(Program { class_name, procs })
}

fn read_op(cur: &mut Cursor<&[u8]>) -> Result<Op, String> {
    let code = read_u8(cur)?;
    let op = match code {
        0x01 => Op::Const { dest: read_local(cur)?, val: read_const(cur)? },
        0x02 => Op::LoadClass { dest: read_local(cur)?, name: read_string(cur)? },
        0x03 => Op::EnumValue {
            dest: read_local(cur)?,
            class: read_string(cur)?,
            variant: read_string(cur)?,
        },
        0x04 => Op::ParseUrl { dest: read_local(cur)?, text: read_string(cur)? },
        0x05 => Op::ParseDuration { dest: read_local(cur)?, text: read_string(cur)? },
        0x10 => Op::CtxGet { dest: read_local(cur)?, key: read_string(cur)? },
        0x11 => Op::CtxPut { key: read_string(cur)?, src: read_local(cur)? },
        0x12 => Op::SetStepName { name: read_string(cur)? },
        0x20 => Op::MakeSharedArray { len: read_u32(cur)? as usize },
        0x21 => Op::SharedRead {
            dest: read_local(cur)?,
            index: read_u32(cur)? as usize,
            cast: read_opt_string(cur)?,
        },
        0x22 => Op::SharedWrite { index: read_u32(cur)? as usize, src: read_local(cur)? },
        0x30 => Op::New {
            dest: read_local(cur)?,
            class: read_string(cur)?,
            ctor: read_u32(cur)? as usize,
            args: read_locals(cur)?,
        },
        0x31 => Op::Factory {
            dest: read_local(cur)?,
            kind: read_factory(cur)?,
            args: read_locals(cur)?,
        },
        0x32 => Op::NewArray {
            dest: read_local(cur)?,
            component: read_string(cur)?,
            len: read_u32(cur)? as usize,
        },
        0x33 => Op::ArrayWrite {
            array: read_local(cur)?,
            index: read_u32(cur)? as usize,
            src: read_local(cur)?,
        },
        0x34 => Op::NewAnnotation {
            dest: read_local(cur)?,
            class: read_string(cur)?,
            args: read_locals(cur)?,
        },
        0x35 => Op::WrapRuntimeValue { dest: read_local(cur)?, src: read_local(cur)? },
        0x36 => Op::Deserialize {
            dest: read_local(cur)?,
            provider: read_string(cur)?,
            src: read_local(cur)?,
        },
        0x40 => {
            let dest = read_local(cur)?;
            let raw = read_local(cur)?;
            let args = read_locals(cur)?;
            let owner = if read_u8(cur)? != 0 { Some(read_local(cur)?) } else { None };
            Op::MakeParameterized { dest, raw, args, owner }
        }
        0x41 => Op::MakeGenericArray { dest: read_local(cur)?, component: read_local(cur)? },
        0x42 => Op::MakeWildcard {
            dest: read_local(cur)?,
            upper: read_u8(cur)? != 0,
            bound: read_local(cur)?,
        },
        0x50 => Op::Add { target: read_local(cur)?, item: read_local(cur)? },
        0x51 => Op::Put {
            target: read_local(cur)?,
            key: read_local(cur)?,
            value: read_local(cur)?,
        },
        0x52 => Op::SetProperty {
            target: read_local(cur)?,
            name: read_string(cur)?,
            src: read_local(cur)?,
        },
        0x53 => Op::SetField {
            target: read_local(cur)?,
            name: read_string(cur)?,
            src: read_local(cur)?,
        },
        0x54 => Op::GetProperty {
            dest: read_local(cur)?,
            target: read_local(cur)?,
            name: read_string(cur)?,
        },
        0x60 => {
            let dest = if read_u8(cur)? != 0 { Some(read_local(cur)?) } else { None };
            Op::Invoke {
                dest,
                recorder: read_local(cur)?,
                class: read_string(cur)?,
                method: read_string(cur)?,
                args: read_locals(cur)?,
            }
        }
        0x70 => Op::CallProc { index: read_u32(cur)? as usize },
        0x80 => Op::Ret,
        other => return Err(format!("unknown opcode 0x{:02x}", other)),
    };
    Ok(op)
}

fn read_factory(cur: &mut Cursor<&[u8]>) -> Result<FactoryKind, String> {
    Ok(match read_u8(cur)? {
        0x01 => FactoryKind::EmptyList,
        0x02 => FactoryKind::EmptySet,
        0x03 => FactoryKind::EmptySortedSet,
        0x04 => FactoryKind::EmptyMap,
        0x05 => FactoryKind::EmptySortedMap,
        0x06 => FactoryKind::SingletonList,
        0x07 => FactoryKind::SingletonSet,
        0x08 => FactoryKind::SingletonMap,
        0x09 => FactoryKind::OptionalOf,
        0x0a => FactoryKind::OptionalEmpty,
        0x0b => FactoryKind::UnboundedWildcard,
        other => return Err(format!("unknown factory tag 0x{:02x}", other)),
    })
}

fn read_const(cur: &mut Cursor<&[u8]>) -> Result<ConstVal, String> {
    Ok(match read_u8(cur)? {
        0x01 => ConstVal::Int(read_u64(cur)? as i64),
        0x02 => ConstVal::Float(f64::from_bits(read_u64(cur)?)),
        0x03 => ConstVal::Bool(read_u8(cur)? != 0),
        0x04 => ConstVal::Str(read_string(cur)?),
        0x06 => {
            let c = read_u32(cur)?;
            ConstVal::Char(char::from_u32(c).ok_or_else(|| format!("invalid char {}", c))?)
        }
        0x07 => ConstVal::Null,
        other => return Err(format!("unknown const tag 0x{:02x}", other)),
    })
}

fn read_local(cur: &mut Cursor<&[u8]>) -> Result<Local, String> {
    Ok(read_u32(cur)? as usize)
}

fn read_locals(cur: &mut Cursor<&[u8]>) -> Result<Vec<Local>, String> {
    let len = read_u32(cur)? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(read_local(cur)?);
    }
    Ok(out)
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, String> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b).map_err(|e| format!("unexpected eof: {}", e))?;
    Ok(b[0])
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32, String> {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b).map_err(|e| format!("unexpected eof: {}", e))?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(cur: &mut Cursor<&[u8]>) -> Result<u64, String> {
    let mut b = [0u8; 8];
    cur.read_exact(&mut b).map_err(|e| format!("unexpected eof: {}", e))?;
    Ok(u64::from_le_bytes(b))
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, String> {
    let len = read_u32(cur)? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(|e| format!("unexpected eof reading string: {}", e))?;
    String::from_utf8(buf).map_err(|e| format!("invalid utf8: {}", e))
}

fn read_opt_string(cur: &mut Cursor<&[u8]>) -> Result<Option<String>, String> {
    if read_u8(cur)? != 0 {
        Ok(Some(read_string(cur)?))
    } else {
        Ok(None)
    }
}
