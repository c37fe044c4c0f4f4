use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result};
use crate::objects::{
    Allocation, Deallocation, Header, ObjectKind, ObjectPrefix, Session, Stacktrace, SymbolEntry,
    CURRENT_VERSION, MAGIC,
};
use crate::Arch;

fn write_word(out: &mut Vec<u8>, arch: Arch, value: u64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    out.extend_from_slice(&buf[..arch.word_size()]);
}

fn patch_word(out: &mut [u8], at: usize, arch: Arch, value: u64) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, value);
    out[at..at + arch.word_size()].copy_from_slice(&buf[..arch.word_size()]);
}

fn write_record(out: &mut Vec<u8>, arch: Arch, kind: ObjectKind, body: impl FnOnce(&mut Vec<u8>)) {
    let start = out.len();
    out.push(kind as u8);
    out.push(0); // reserved
    let size_pos = out.len();
    write_word(out, arch, 0);
    body(out);
    let total = (out.len() - start) as u64;
    patch_word(out, size_pos, arch, total);
}

fn write_lp_bytes(out: &mut Vec<u8>, arch: Arch, bytes: &[u8]) {
    write_word(out, arch, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Writes exactly 8 bytes: magic (4), version (2), architecture tag (2).
pub fn serialize_header(out: &mut Vec<u8>, header: &Header) {
    let mut buf = [0u8; 8];
    LittleEndian::write_u32(&mut buf[0..4], header.magic);
    LittleEndian::write_u16(&mut buf[4..6], header.version);
    LittleEndian::write_u16(&mut buf[6..8], header.arch.tag());
    out.extend_from_slice(&buf);
}

pub fn serialize_session(out: &mut Vec<u8>, arch: Arch, process_id: u32, timestamp: u64) {
    write_record(out, arch, ObjectKind::Session, |out| {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, process_id);
        out.extend_from_slice(&buf);
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, timestamp);
        out.extend_from_slice(&buf);
    });
}

pub fn serialize_allocation(out: &mut Vec<u8>, arch: Arch, allocation: &Allocation) {
    write_record(out, arch, ObjectKind::Allocation, |out| {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, allocation.stacktrace_id);
        out.extend_from_slice(&buf);
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, allocation.timestamp);
        out.extend_from_slice(&buf);
        write_word(out, arch, allocation.pointer);
        write_word(out, arch, allocation.size);
    });
}

pub fn serialize_deallocation(out: &mut Vec<u8>, arch: Arch, deallocation: &Deallocation) {
    write_record(out, arch, ObjectKind::Deallocation, |out| {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, deallocation.timestamp);
        out.extend_from_slice(&buf);
        write_word(out, arch, deallocation.pointer);
    });
}

pub fn serialize_stacktrace(
    out: &mut Vec<u8>,
    arch: Arch,
    stacktrace_id: u32,
    symbols: &[SymbolEntry],
    timestamp: u64,
) {
    write_record(out, arch, ObjectKind::Stacktrace, |out| {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, timestamp);
        out.extend_from_slice(&buf);
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, stacktrace_id);
        out.extend_from_slice(&buf);
        write_word(out, arch, symbols.len() as u64);
        for entry in symbols {
            write_lp_bytes(out, arch, entry.name.as_bytes());
            write_word(out, arch, entry.line);
            write_lp_bytes(out, arch, entry.file.as_bytes());
        }
    });
}

fn read_u8(stream: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    stream
        .read_exact(&mut buf)
        .map_err(|_| FormatError::ShortRead("u8"))?;
    Ok(buf[0])
}

fn read_u16(stream: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    stream
        .read_exact(&mut buf)
        .map_err(|_| FormatError::ShortRead("u16"))?;
    Ok(LittleEndian::read_u16(&buf))
}

fn read_u32(stream: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    stream
        .read_exact(&mut buf)
        .map_err(|_| FormatError::ShortRead("u32"))?;
    Ok(LittleEndian::read_u32(&buf))
}

fn read_u64(stream: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    stream
        .read_exact(&mut buf)
        .map_err(|_| FormatError::ShortRead("u64"))?;
    Ok(LittleEndian::read_u64(&buf))
}

fn read_word(stream: &mut impl Read, arch: Arch) -> Result<u64> {
    let mut buf = [0u8; 8];
    stream
        .read_exact(&mut buf[..arch.word_size()])
        .map_err(|_| FormatError::ShortRead("platform word"))?;
    Ok(LittleEndian::read_u64(&buf))
}

fn read_lp_bytes(stream: &mut impl Read, arch: Arch) -> Result<Vec<u8>> {
    let len = read_word(stream, arch)? as usize;
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .map_err(|_| FormatError::ShortRead("length-prefixed bytes"))?;
    Ok(buf)
}

fn read_prefix(stream: &mut impl Read) -> Result<(ObjectKind, u8)> {
    let tag = read_u8(stream)?;
    let kind = ObjectKind::from_tag(tag).ok_or(FormatError::UnknownTag(tag))?;
    let reserved = read_u8(stream)?;
    Ok((kind, reserved))
}

fn expect_kind(found: ObjectKind, expected: ObjectKind) -> Result<()> {
    if found != expected {
        Err(FormatError::TagMismatch(found as u8, expected))
    } else {
        Ok(())
    }
}

/// Reads the 8-byte file header and validates its magic, rejecting unknown
/// versions and, when `expected_arch` is given, architecture mismatches.
pub fn parse_header(stream: &mut impl Read, expected_arch: Option<Arch>) -> Result<Header> {
    let magic = read_u32(stream)?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic(magic));
    }
    let version = read_u16(stream)?;
    if version != CURRENT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    let arch_tag = read_u16(stream)?;
    let arch = Arch::from_tag(arch_tag).ok_or(FormatError::UnsupportedVersion(version))?;
    if let Some(expected) = expected_arch {
        if expected.tag() != arch.tag() {
            return Err(FormatError::ArchMismatch {
                written: arch.tag(),
                reader: expected.tag(),
            });
        }
    }
    Ok(Header {
        magic,
        version,
        arch,
    })
}

/// Peeks the next record's tag and object size without consuming it: the
/// stream cursor is rewound to the start of the record on success. Returns
/// `Ok(None)` at a clean end of stream (zero bytes available for the tag).
pub fn parse_object<R: Read + Seek>(stream: &mut R, arch: Arch) -> Result<Option<ObjectPrefix>> {
    let start = stream.stream_position()?;
    let mut tag_buf = [0u8; 1];
    let n = stream.read(&mut tag_buf)?;
    if n == 0 {
        return Ok(None);
    }
    let tag = tag_buf[0];
    let kind = ObjectKind::from_tag(tag);
    let _reserved = read_u8(stream)?;
    let object_size = read_word(stream, arch)?;
    stream.seek(SeekFrom::Start(start))?;
    Ok(Some(ObjectPrefix {
        tag,
        kind,
        object_size,
    }))
}

/// Advances the stream by `prefix.object_size` bytes from the current
/// position (which must be the start of the record `prefix` describes).
pub fn skip_object<R: Seek>(stream: &mut R, prefix: &ObjectPrefix) -> Result<()> {
    let offset =
        i64::try_from(prefix.object_size).map_err(|_| FormatError::SizeOverflow(prefix.object_size))?;
    stream.seek(SeekFrom::Current(offset))?;
    Ok(())
}

pub fn parse_session(stream: &mut impl Read, arch: Arch) -> Result<Session> {
    let (kind, _reserved) = read_prefix(stream)?;
    expect_kind(kind, ObjectKind::Session)?;
    let _object_size = read_word(stream, arch)?;
    let process_id = read_u32(stream)?;
    let timestamp = read_u64(stream)?;
    Ok(Session {
        process_id,
        timestamp,
    })
}

pub fn parse_allocation(stream: &mut impl Read, arch: Arch) -> Result<Allocation> {
    let (kind, _reserved) = read_prefix(stream)?;
    expect_kind(kind, ObjectKind::Allocation)?;
    let _object_size = read_word(stream, arch)?;
    let stacktrace_id = read_u32(stream)?;
    let timestamp = read_u64(stream)?;
    let pointer = read_word(stream, arch)?;
    let size = read_word(stream, arch)?;
    Ok(Allocation {
        stacktrace_id,
        timestamp,
        pointer,
        size,
    })
}

pub fn parse_deallocation(stream: &mut impl Read, arch: Arch) -> Result<Deallocation> {
    let (kind, _reserved) = read_prefix(stream)?;
    expect_kind(kind, ObjectKind::Deallocation)?;
    let _object_size = read_word(stream, arch)?;
    let timestamp = read_u64(stream)?;
    let pointer = read_word(stream, arch)?;
    Ok(Deallocation { timestamp, pointer })
}

pub fn parse_stacktrace(stream: &mut impl Read, arch: Arch) -> Result<Stacktrace> {
    let (kind, _reserved) = read_prefix(stream)?;
    expect_kind(kind, ObjectKind::Stacktrace)?;
    let _object_size = read_word(stream, arch)?;
    let timestamp = read_u64(stream)?;
    let stacktrace_id = read_u32(stream)?;
    let num_entries = read_word(stream, arch)? as usize;
    let mut symbols = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        let name = read_lp_bytes(stream, arch)?;
        let line = read_word(stream, arch)?;
        let file = read_lp_bytes(stream, arch)?;
        symbols.push(SymbolEntry {
            name: String::from_utf8_lossy(&name).into_owned(),
            file: String::from_utf8_lossy(&file).into_owned(),
            line,
        });
    }
    Ok(Stacktrace {
        stacktrace_id,
        timestamp,
        symbols,
    })
}
