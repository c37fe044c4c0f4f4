use std::path::Path;

use kael_format::{EventLogReader, LogRecord};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AllocationRow {
    pub allocation_id: u64,
    pub stacktrace_id: u32,
    pub pointer: u64,
    pub size: u64,
    pub allocation_timestamp: u64,
    pub free_timestamp: Option<u64>,
    pub freed: bool,
}

#[derive(Debug, Clone)]
pub struct StackEntryRow {
    pub id: u64,
    pub stacktrace_id: u32,
    pub stacktrace_index: u32,
    pub module_base_address: Option<u64>,
    pub file_name: String,
    pub symbol_name: String,
    pub line_number: u64,
}

#[derive(Debug, Default)]
pub struct Report {
    pub allocations: Vec<AllocationRow>,
    pub stack_entries: Vec<StackEntryRow>,
}

/// Reads a session log end to end and projects it into the relational
/// shape a converter emits: one row per allocation (paired with its
/// eventual free, if any) and one row per stack-trace entry.
///
/// A deallocation is matched to the earliest still-unfreed allocation
/// recorded with the same pointer — the same pointer can be reused by
/// multiple allocations over a process's lifetime, and only the oldest
/// live one could plausibly be the one being freed.
pub fn build_report(path: &Path) -> Result<Report> {
    let reader = EventLogReader::open(path)?;
    let mut report = Report::default();
    let mut next_allocation_id: u64 = 1;
    let mut next_stackentry_id: u64 = 1;

    for record in reader {
        match record? {
            LogRecord::Session(_) => {}
            LogRecord::Stacktrace(trace) => {
                for (index, symbol) in trace.symbols.iter().enumerate() {
                    report.stack_entries.push(StackEntryRow {
                        id: next_stackentry_id,
                        stacktrace_id: trace.stacktrace_id,
                        stacktrace_index: index as u32,
                        module_base_address: None,
                        file_name: symbol.file.clone(),
                        symbol_name: symbol.name.clone(),
                        line_number: symbol.line,
                    });
                    next_stackentry_id += 1;
                }
            }
            LogRecord::Allocation(allocation) => {
                report.allocations.push(AllocationRow {
                    allocation_id: next_allocation_id,
                    stacktrace_id: allocation.stacktrace_id,
                    pointer: allocation.pointer,
                    size: allocation.size,
                    allocation_timestamp: allocation.timestamp,
                    free_timestamp: None,
                    freed: false,
                });
                next_allocation_id += 1;
            }
            LogRecord::Deallocation(deallocation) => {
                if let Some(row) = report
                    .allocations
                    .iter_mut()
                    .find(|row| !row.freed && row.pointer == deallocation.pointer)
                {
                    row.freed = true;
                    row.free_timestamp = Some(deallocation.timestamp);
                }
            }
        }
    }

    Ok(report)
}

pub fn write_csv(report: &Report, allocation_path: &Path, stackentry_path: &Path) -> Result<()> {
    let mut allocation_writer = csv::Writer::from_path(allocation_path)?;
    allocation_writer.write_record([
        "AllocationID",
        "StacktraceID",
        "Pointer",
        "Size",
        "AllocationTimestamp",
        "FreeTimestamp",
        "Freed",
    ])?;
    for row in &report.allocations {
        allocation_writer.write_record([
            row.allocation_id.to_string(),
            row.stacktrace_id.to_string(),
            row.pointer.to_string(),
            row.size.to_string(),
            row.allocation_timestamp.to_string(),
            row.free_timestamp.map(|t| t.to_string()).unwrap_or_default(),
            row.freed.to_string(),
        ])?;
    }
    allocation_writer.flush()?;

    let mut stackentry_writer = csv::Writer::from_path(stackentry_path)?;
    stackentry_writer.write_record([
        "ID",
        "StackTraceID",
        "StackTraceIndex",
        "ModuleBaseAddress",
        "FileName",
        "SymbolName",
        "LineNumber",
    ])?;
    for row in &report.stack_entries {
        stackentry_writer.write_record([
            row.id.to_string(),
            row.stacktrace_id.to_string(),
            row.stacktrace_index.to_string(),
            row.module_base_address.map(|a| a.to_string()).unwrap_or_default(),
            row.file_name.clone(),
            row.symbol_name.clone(),
            row.line_number.to_string(),
        ])?;
    }
    stackentry_writer.flush()?;
    Ok(())
}

pub fn write_sqlite(report: &Report, path: &Path) -> Result<()> {
    let mut conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE ALLOCATION (
            AllocationID INTEGER PRIMARY KEY,
            StacktraceID INTEGER NOT NULL,
            Pointer INTEGER NOT NULL,
            Size INTEGER NOT NULL,
            AllocationTimestamp INTEGER NOT NULL,
            FreeTimestamp INTEGER,
            Freed INTEGER NOT NULL
        );
        CREATE TABLE STACKENTRY (
            ID INTEGER PRIMARY KEY,
            StackTraceID INTEGER NOT NULL,
            StackTraceIndex INTEGER NOT NULL,
            ModuleBaseAddress INTEGER,
            FileName TEXT NOT NULL,
            SymbolName TEXT NOT NULL,
            LineNumber INTEGER NOT NULL
        );
        CREATE INDEX idx_allocation_stacktrace_id ON ALLOCATION (StacktraceID);
        CREATE INDEX idx_allocation_freed ON ALLOCATION (Freed);
        CREATE INDEX idx_stackentry_stacktrace_id ON STACKENTRY (StackTraceID);
        CREATE INDEX idx_stackentry_symbol_name ON STACKENTRY (SymbolName);",
    )?;

    let tx = conn.transaction()?;
    {
        let mut insert_allocation = tx.prepare(
            "INSERT INTO ALLOCATION (AllocationID, StacktraceID, Pointer, Size, AllocationTimestamp, FreeTimestamp, Freed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for row in &report.allocations {
            insert_allocation.execute(rusqlite::params![
                row.allocation_id,
                row.stacktrace_id,
                row.pointer,
                row.size,
                row.allocation_timestamp,
                row.free_timestamp,
                row.freed,
            ])?;
        }

        let mut insert_stackentry = tx.prepare(
            "INSERT INTO STACKENTRY (ID, StackTraceID, StackTraceIndex, ModuleBaseAddress, FileName, SymbolName, LineNumber)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for row in &report.stack_entries {
            insert_stackentry.execute(rusqlite::params![
                row.id,
                row.stacktrace_id,
                row.stacktrace_index,
                row.module_base_address,
                row.file_name,
                row.symbol_name,
                row.line_number,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kael_format::{Allocation, Arch, Deallocation, EventLogWriter, SymbolEntry};
    use tempfile::tempdir;

    #[test]
    fn pairs_deallocation_with_earliest_unfreed_allocation_at_same_pointer() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("leak.dat");

        {
            let mut writer = EventLogWriter::create(&log_path, Arch::native(), 777, 1000).unwrap();
            let symbols = vec![SymbolEntry { name: "main".to_string(), file: "main.c".to_string(), line: 3 }];
            writer.write_stacktrace(1, &symbols, 1001).unwrap();
            // Two allocations reuse the same pointer; the free should
            // match the first (still unfreed) one, not the second.
            writer
                .write_allocation(&Allocation { stacktrace_id: 1, timestamp: 1001, pointer: 0xA0, size: 16 })
                .unwrap();
            writer
                .write_allocation(&Allocation { stacktrace_id: 1, timestamp: 1002, pointer: 0xA0, size: 32 })
                .unwrap();
            writer
                .write_deallocation(&Deallocation { timestamp: 1003, pointer: 0xA0 })
                .unwrap();
            writer.flush().unwrap();
        }

        let report = build_report(&log_path).unwrap();
        assert_eq!(report.allocations.len(), 2);
        assert!(report.allocations[0].freed);
        assert_eq!(report.allocations[0].free_timestamp, Some(1003));
        assert!(!report.allocations[1].freed);
        assert_eq!(report.stack_entries.len(), 1);
        assert_eq!(report.stack_entries[0].symbol_name, "main");
        assert!(report.stack_entries[0].module_base_address.is_none());
    }

    #[test]
    fn csv_and_sqlite_writers_accept_an_empty_report() {
        let dir = tempdir().unwrap();
        let report = Report::default();
        write_csv(&report, &dir.path().join("allocation.csv"), &dir.path().join("stackentry.csv")).unwrap();
        write_sqlite(&report, &dir.path().join("report.sqlite")).unwrap();
    }
}
