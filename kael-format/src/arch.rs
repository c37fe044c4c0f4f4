/// The pointer width a log was written under. Every "platform word" field in
/// §3 of the format (object sizes, stack-trace entry lengths, pointers) is
/// encoded at this width, not at the reading process's native width — the
/// header's architecture tag is what lets a reader tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arch32,
    Arch64,
}

impl Arch {
    pub const fn word_size(self) -> usize {
        match self {
            Arch::Arch32 => 4,
            Arch::Arch64 => 8,
        }
    }

    pub const fn tag(self) -> u16 {
        match self {
            Arch::Arch32 => 32,
            Arch::Arch64 => 64,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            32 => Some(Arch::Arch32),
            64 => Some(Arch::Arch64),
            _ => None,
        }
    }

    /// The architecture of the process currently running this code.
    pub const fn native() -> Self {
        #[cfg(target_pointer_width = "64")]
        {
            Arch::Arch64
        }
        #[cfg(target_pointer_width = "32")]
        {
            Arch::Arch32
        }
    }
}
