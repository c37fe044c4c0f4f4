use kael_format::SymbolEntry;

const FNV_PRIME: u32 = 0x0100_0193;
const FNV_SEED: u32 = 0x811C_9DC5;

fn fnv1a_byte(byte: u8, hash: u32) -> u32 {
    (byte as u32 ^ hash).wrapping_mul(FNV_PRIME)
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_SEED, |hash, &b| fnv1a_byte(b, hash))
}

/// Derives the 32-bit stack-trace id: FNV-1a over the ordered, non-empty
/// symbol names concatenated as `"[name1][name2]..."`. Two traces with
/// identical ordered symbol names collide by design; file/line differences
/// never change the id.
pub fn stacktrace_id(symbols: &[SymbolEntry]) -> u32 {
    let mut text = String::new();
    for entry in symbols {
        if entry.name.is_empty() {
            continue;
        }
        text.push('[');
        text.push_str(&entry.name);
        text.push(']');
    }
    fnv1a(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> SymbolEntry {
        SymbolEntry {
            name: name.to_string(),
            file: String::new(),
            line: 0,
        }
    }

    #[test]
    fn deterministic_and_order_dependent() {
        let a = stacktrace_id(&[entry("main"), entry("work")]);
        let b = stacktrace_id(&[entry("main"), entry("work")]);
        assert_eq!(a, b);

        let reversed = stacktrace_id(&[entry("work"), entry("main")]);
        assert_ne!(a, reversed);
    }

    #[test]
    fn empty_names_are_skipped() {
        let with_blank = stacktrace_id(&[entry("main"), entry(""), entry("work")]);
        let without_blank = stacktrace_id(&[entry("main"), entry("work")]);
        assert_eq!(with_blank, without_blank);
    }

    #[test]
    fn file_and_line_do_not_affect_id() {
        let a = stacktrace_id(&[SymbolEntry {
            name: "main".to_string(),
            file: "main.c".to_string(),
            line: 10,
        }]);
        let b = stacktrace_id(&[SymbolEntry {
            name: "main".to_string(),
            file: "other.c".to_string(),
            line: 99,
        }]);
        assert_eq!(a, b);
    }

    #[test]
    fn matches_reference_value() {
        // fnv1a("[main][work]") computed against the FNV-1a reference constants.
        let id = stacktrace_id(&[entry("main"), entry("work")]);
        assert_eq!(id, fnv1a(b"[main][work]"));
    }
}
