use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use crate::codec::{
    parse_allocation, parse_deallocation, parse_header, parse_object, parse_session,
    parse_stacktrace, serialize_allocation, serialize_deallocation, serialize_header,
    serialize_session, serialize_stacktrace, skip_object,
};
use crate::error::{FormatError, Result};
use crate::objects::{
    Allocation, Deallocation, Header, LogRecord, ObjectKind, SymbolEntry,
};
use crate::Arch;

/// Owns the log file handle and delegates (de)serialization to the codec
/// module. Appends only; the file is closed when the writer is dropped.
pub struct EventLogWriter {
    file: BufWriter<File>,
    arch: Arch,
}

impl EventLogWriter {
    /// Creates a new log file, writing the header and the opening `Session`
    /// record immediately.
    pub fn create(path: impl AsRef<Path>, arch: Arch, process_id: u32, timestamp: u64) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = EventLogWriter {
            file: BufWriter::new(file),
            arch,
        };
        writer.write_header()?;
        writer.write_session(process_id, timestamp)?;
        Ok(writer)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(8);
        serialize_header(&mut buf, &Header::for_writer(self.arch));
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn write_session(&mut self, process_id: u32, timestamp: u64) -> Result<()> {
        let mut buf = Vec::new();
        serialize_session(&mut buf, self.arch, process_id, timestamp);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn write_allocation(&mut self, allocation: &Allocation) -> Result<()> {
        let mut buf = Vec::new();
        serialize_allocation(&mut buf, self.arch, allocation);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn write_deallocation(&mut self, deallocation: &Deallocation) -> Result<()> {
        let mut buf = Vec::new();
        serialize_deallocation(&mut buf, self.arch, deallocation);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn write_stacktrace(
        &mut self,
        stacktrace_id: u32,
        symbols: &[SymbolEntry],
        timestamp: u64,
    ) -> Result<()> {
        let mut buf = Vec::new();
        serialize_stacktrace(&mut buf, self.arch, stacktrace_id, symbols, timestamp);
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Reads a log file: the header first (validated against the reading
/// process's pointer width), then a stream of records.
pub struct EventLogReader {
    file: BufReader<File>,
    arch: Arch,
    len: u64,
    stopped: bool,
}

impl EventLogReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut file = BufReader::new(file);
        let header = parse_header(&mut file, Some(Arch::native()))?;
        Ok(EventLogReader {
            file,
            arch: header.arch,
            len,
            stopped: false,
        })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }
}

impl Iterator for EventLogReader {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }

        loop {
            let prefix = match parse_object(&mut self.file, self.arch) {
                Ok(Some(prefix)) => prefix,
                Ok(None) => return None,
                Err(err) => {
                    self.stopped = true;
                    return Some(Err(err));
                }
            };

            let record = match prefix.kind {
                Some(ObjectKind::Session) => {
                    parse_session(&mut self.file, self.arch).map(LogRecord::Session)
                }
                Some(ObjectKind::Allocation) => {
                    parse_allocation(&mut self.file, self.arch).map(LogRecord::Allocation)
                }
                Some(ObjectKind::Deallocation) => {
                    parse_deallocation(&mut self.file, self.arch).map(LogRecord::Deallocation)
                }
                Some(ObjectKind::Stacktrace) => {
                    parse_stacktrace(&mut self.file, self.arch).map(LogRecord::Stacktrace)
                }
                // A stray Header (or a tag this reader doesn't recognize)
                // mid-stream: skip it by its declared size.
                Some(ObjectKind::Header) | None => {
                    let before = match self.file.stream_position() {
                        Ok(pos) => pos,
                        Err(err) => {
                            self.stopped = true;
                            return Some(Err(FormatError::Io(err)));
                        }
                    };
                    if before + prefix.object_size > self.len {
                        self.stopped = true;
                        return Some(Err(FormatError::SkipOvershoot {
                            from: before,
                            size: prefix.object_size,
                        }));
                    }
                    if let Err(err) = skip_object(&mut self.file, &prefix) {
                        self.stopped = true;
                        return Some(Err(err));
                    }
                    continue;
                }
            };

            return Some(record.map_err(|err| {
                self.stopped = true;
                err
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FormatError;

    fn entry(name: &str, file: &str, line: u64) -> SymbolEntry {
        SymbolEntry {
            name: name.to_string(),
            file: file.to_string(),
            line,
        }
    }

    #[test]
    fn single_alloc_free_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leak.dat");

        let mut writer = EventLogWriter::create(&path, Arch::native(), 111, 1000).unwrap();
        writer
            .write_stacktrace(42, &[entry("main", "main.c", 10)], 1001)
            .unwrap();
        writer
            .write_allocation(&Allocation {
                stacktrace_id: 42,
                timestamp: 1001,
                pointer: 0xA0,
                size: 32,
            })
            .unwrap();
        writer
            .write_deallocation(&Deallocation {
                timestamp: 1002,
                pointer: 0xA0,
            })
            .unwrap();
        writer.flush().unwrap();

        let records: Vec<_> = EventLogReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            records,
            vec![
                LogRecord::Session(Session {
                    process_id: 111,
                    timestamp: 1000
                }),
                LogRecord::Stacktrace(Stacktrace {
                    stacktrace_id: 42,
                    timestamp: 1001,
                    symbols: vec![entry("main", "main.c", 10)],
                }),
                LogRecord::Allocation(Allocation {
                    stacktrace_id: 42,
                    timestamp: 1001,
                    pointer: 0xA0,
                    size: 32,
                }),
                LogRecord::Deallocation(Deallocation {
                    timestamp: 1002,
                    pointer: 0xA0,
                }),
            ]
        );
    }

    #[test]
    fn stacktrace_with_zero_and_max_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leak.dat");

        let mut writer = EventLogWriter::create(&path, Arch::native(), 1, 0).unwrap();
        writer.write_stacktrace(1, &[], 5).unwrap();

        let many: Vec<_> = (0..crate::MAX_STACK_FRAMES)
            .map(|i| entry(&format!("frame{i}"), "", 0))
            .collect();
        writer.write_stacktrace(2, &many, 6).unwrap();
        writer.flush().unwrap();

        let records: Vec<_> = EventLogReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        match &records[1] {
            LogRecord::Stacktrace(s) => assert_eq!(s.symbols.len(), 0),
            other => panic!("expected stacktrace, got {other:?}"),
        }
        match &records[2] {
            LogRecord::Stacktrace(s) => assert_eq!(s.symbols.len(), crate::MAX_STACK_FRAMES),
            other => panic!("expected stacktrace, got {other:?}"),
        }
    }

    #[test]
    fn skip_object_advances_exactly_object_size() {
        let mut buf = Vec::new();
        serialize_session(&mut buf, Arch::Arch64, 1, 2);
        let session_len = buf.len();
        serialize_allocation(
            &mut buf,
            Arch::Arch64,
            &Allocation {
                stacktrace_id: 1,
                timestamp: 2,
                pointer: 3,
                size: 4,
            },
        );

        let mut cursor = std::io::Cursor::new(buf);
        let prefix = parse_object(&mut cursor, Arch::Arch64).unwrap().unwrap();
        assert_eq!(prefix.object_size as usize, session_len);
        skip_object(&mut cursor, &prefix).unwrap();
        assert_eq!(cursor.position() as usize, session_len);

        // The next record parses cleanly from here.
        let next_prefix = parse_object(&mut cursor, Arch::Arch64).unwrap().unwrap();
        assert_eq!(next_prefix.kind, Some(ObjectKind::Allocation));
    }

    #[test]
    fn skip_unknown_tag_between_allocations() {
        let mut buf = Vec::new();
        serialize_allocation(
            &mut buf,
            Arch::Arch64,
            &Allocation {
                stacktrace_id: 1,
                timestamp: 1,
                pointer: 1,
                size: 1,
            },
        );
        // Unknown tag 0xEE, object_size = 40, 32 bytes of filler payload.
        buf.push(0xEE);
        buf.push(0);
        buf.extend_from_slice(&40u64.to_le_bytes());
        buf.extend_from_slice(&[0u8; 30]);
        serialize_allocation(
            &mut buf,
            Arch::Arch64,
            &Allocation {
                stacktrace_id: 2,
                timestamp: 2,
                pointer: 2,
                size: 2,
            },
        );

        let mut cursor = std::io::Cursor::new(buf);
        let mut allocations = Vec::new();
        loop {
            let prefix = match parse_object(&mut cursor, Arch::Arch64).unwrap() {
                Some(p) => p,
                None => break,
            };
            match prefix.kind {
                Some(ObjectKind::Allocation) => {
                    allocations.push(parse_allocation(&mut cursor, Arch::Arch64).unwrap());
                }
                _ => skip_object(&mut cursor, &prefix).unwrap(),
            }
        }
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].stacktrace_id, 1);
        assert_eq!(allocations[1].stacktrace_id, 2);
    }

    #[test]
    fn arch_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leak.dat");
        let other = match Arch::native() {
            Arch::Arch64 => Arch::Arch32,
            Arch::Arch32 => Arch::Arch64,
        };
        EventLogWriter::create(&path, other, 1, 1).unwrap();

        let err = EventLogReader::open(&path).unwrap_err();
        assert!(matches!(err, FormatError::ArchMismatch { .. }));
    }
}
